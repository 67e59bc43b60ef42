#![forbid(unsafe_code)]

//! Aggregated staleness over a fixed set of children.

/// Outcome of recording one child's stale flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTransition {
    Unchanged,
    BecameStale,
    BecameFresh,
}

/// Counts stale children and reports the aggregate's transitions.
///
/// Callers record a child's flag when it fires a stale event (`true`) and
/// again after it fires a change event (its current `is_stale()`).
#[derive(Debug, Clone, Default)]
pub struct StalenessTracker {
    flags: Vec<bool>,
    stale_count: usize,
}

impl StalenessTracker {
    pub fn new(initial: impl IntoIterator<Item = bool>) -> Self {
        let flags: Vec<bool> = initial.into_iter().collect();
        let stale_count = flags.iter().filter(|stale| **stale).count();
        Self { flags, stale_count }
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale_count > 0
    }

    /// Record `stale` for `child`; out-of-range children are ignored.
    pub fn update(&mut self, child: usize, stale: bool) -> StaleTransition {
        let Some(flag) = self.flags.get_mut(child) else {
            return StaleTransition::Unchanged;
        };
        if *flag == stale {
            return StaleTransition::Unchanged;
        }
        *flag = stale;
        if stale {
            self.stale_count += 1;
            if self.stale_count == 1 {
                return StaleTransition::BecameStale;
            }
        } else {
            self.stale_count -= 1;
            if self.stale_count == 0 {
                return StaleTransition::BecameFresh;
            }
        }
        StaleTransition::Unchanged
    }
}
