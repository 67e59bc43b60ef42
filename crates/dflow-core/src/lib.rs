#![forbid(unsafe_code)]

//! Core: owning contexts, errors, identity keys, and type tokens shared by the
//! dflow diff engine and observables.

pub mod error;
pub mod identity;
pub mod logging;
pub mod realm;
pub mod token;

pub use error::{ObservableError, Result};
pub use identity::{ByIdentity, HasIdentity, Identity, IdentityMap, IdentitySet};
pub use realm::{Realm, RealmGuard};
pub use token::TypeToken;
