#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashSet;
use arbitrary::Arbitrary;
use dflow_core::Realm;
use dflow_observable::{ObservableSet, UnionSet, WritableSet};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Insert { child: u8, element: u8 },
    Remove { child: u8, element: u8 },
    Clear { child: u8 },
    Toggle,
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    if ops.len() > 512 {
        return;
    }
    let realm = Realm::new();
    let children: Vec<WritableSet<u8>> = (0..3).map(|_| WritableSet::new(&realm)).collect();
    let union = UnionSet::new(&realm, children.iter().map(WritableSet::handle).collect());
    let replica = Rc::new(RefCell::new(AHashSet::new()));
    let mut subscription = None;

    for op in ops {
        match op {
            FuzzOp::Insert { child, element } => {
                let _ = children[usize::from(child % 3)].insert(element % 16);
            }
            FuzzOp::Remove { child, element } => {
                let _ = children[usize::from(child % 3)].remove(&(element % 16));
            }
            FuzzOp::Clear { child } => {
                let _ = children[usize::from(child % 3)].clear();
            }
            FuzzOp::Toggle => {
                if subscription.take().is_none() {
                    *replica.borrow_mut() = union.to_set();
                    let sink = Rc::clone(&replica);
                    subscription = Some(union.subscribe_set(Box::new(move |diff| {
                        diff.apply_to(&mut sink.borrow_mut());
                    })));
                }
            }
        }

        let expected: AHashSet<u8> = children.iter().flat_map(|c| c.to_set()).collect();
        assert_eq!(union.to_set(), expected);
        if subscription.is_some() {
            assert_eq!(*replica.borrow(), expected);
        }
    }
});
