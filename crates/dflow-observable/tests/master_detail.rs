//! Master/detail scenario: a selection drives a name and a tag list.
//!
//! Details are owned by the detail observable and disposed on every switch,
//! so the factories hand out fresh views (a map entry, a read-only list)
//! over long-lived records.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use dflow_core::Realm;
use dflow_diff::{ListDiff, ValueDiff};
use dflow_observable::{
    DetailList, DetailValue, MapEntryValue, Observable, ObservableList, ObservableMap,
    ObservableValue, UnmodifiableList, WritableList, WritableMap, WritableValue,
};

struct Records {
    selected: WritableValue<Option<u32>>,
    names: WritableMap<u32, String>,
    tags: Rc<AHashMap<u32, WritableList<&'static str>>>,
    name: DetailValue<Option<u32>, Option<String>>,
    tag_list: DetailList<Option<u32>, &'static str>,
}

fn records() -> Records {
    let realm = Realm::new();
    let selected = WritableValue::new(&realm, None);
    let names = WritableMap::from_map(
        &realm,
        [(1, "ann".to_owned()), (2, "bob".to_owned())].into_iter().collect(),
    );
    let tags: Rc<AHashMap<u32, WritableList<&'static str>>> = Rc::new(
        [
            (1, WritableList::from_vec(&realm, vec!["admin", "ops"])),
            (2, WritableList::from_vec(&realm, vec!["dev"])),
        ]
        .into_iter()
        .collect(),
    );

    let directory = names.handle();
    let name = DetailValue::new(selected.handle(), move |id: &Option<u32>| {
        id.map(|id| MapEntryValue::new(Rc::clone(&directory), id).handle())
    });
    let lists = Rc::clone(&tags);
    let tag_list = DetailList::new(selected.handle(), move |id: &Option<u32>| {
        id.and_then(|id| lists.get(&id))
            .map(|list| UnmodifiableList::new(list.handle()).handle())
    });
    Records {
        selected,
        names,
        tags,
        name,
        tag_list,
    }
}

#[test]
fn selection_drives_name_and_tags() {
    let r = records();
    let names_seen: Rc<RefCell<Vec<ValueDiff<Option<Option<String>>>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&names_seen);
    let _name_sub = r.name.subscribe_value(Box::new(move |d: &ValueDiff<_>| {
        sink.borrow_mut().push(d.clone());
    }));
    let tag_diffs: Rc<RefCell<Vec<ListDiff<&'static str>>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&tag_diffs);
    let _tag_sub = r.tag_list.subscribe_list(Box::new(move |d: &ListDiff<_>| {
        sink.borrow_mut().push(d.clone());
    }));

    let mut replica = r.tag_list.to_vec();
    assert!(replica.is_empty());
    assert_eq!(r.name.value(), None);

    r.selected.set(Some(1)).unwrap();
    assert_eq!(r.name.value(), Some(Some("ann".to_owned())));
    r.tags[&1].push("oncall").unwrap();
    r.tags[&2].push("unseen").unwrap();
    r.selected.set(Some(2)).unwrap();
    r.names.put(2, "rob".to_owned()).unwrap();
    r.selected.set(None).unwrap();

    for diff in tag_diffs.borrow().iter() {
        diff.apply_to(&mut replica).unwrap();
    }
    assert_eq!(replica, r.tag_list.to_vec());
    assert!(replica.is_empty());
    assert_eq!(tag_diffs.borrow().len(), 4, "select, push, switch, deselect");

    let names_seen = names_seen.borrow();
    assert_eq!(names_seen.len(), 4);
    assert_eq!(names_seen[2].new, Some(Some("rob".to_owned())));
    assert_eq!(names_seen[3].new, None);
}

#[test]
fn switching_releases_the_previous_record() {
    let r = records();
    let _sub = r.tag_list.subscribe_list(Box::new(|_| {}));
    r.selected.set(Some(1)).unwrap();
    assert!(r.tags[&1].has_listeners());
    r.selected.set(Some(2)).unwrap();
    assert!(!r.tags[&1].has_listeners());
    assert!(!r.tags[&1].is_disposed(), "only the view was disposed");
    assert!(r.tags[&2].has_listeners());
}

#[test]
fn writes_reach_the_selected_record() {
    let r = records();
    r.selected.set(Some(1)).unwrap();
    r.name.set_value(Some(Some("anna".to_owned()))).unwrap();
    assert_eq!(r.names.to_map().get(&1).map(String::as_str), Some("anna"));
    assert!(r.tag_list.push("x").is_err(), "the tag view is read-only");
}

#[cfg(feature = "tracing")]
mod tracing_events {
    use std::sync::{Arc, Mutex};

    use dflow_core::Realm;
    use dflow_observable::{
        DetailValue, ObservableSet, ObservableValue, UnionSet, WritableSet, WritableValue,
    };
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct MessageCapture {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl<S: Subscriber> Layer<S> for MessageCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Msg {
                message: Option<String>,
            }
            impl tracing::field::Visit for Msg {
                fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                    if field.name() == "message" {
                        self.message = Some(value.to_string());
                    }
                }

                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                    }
                }
            }
            let mut msg = Msg { message: None };
            event.record(&mut msg);
            if let Some(message) = msg.message {
                self.messages.lock().expect("capture lock").push(message);
            }
        }
    }

    #[test]
    fn activation_and_rebind_events_emitted() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(MessageCapture {
            messages: Arc::clone(&messages),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let realm = Realm::new();
        let a = WritableSet::from_set(&realm, [1].into_iter().collect());
        let union = UnionSet::new(&realm, vec![a.handle()]);
        drop(union.subscribe_set(Box::new(|_| {})));

        let master = WritableValue::new(&realm, 1u8);
        let detail_realm = realm.clone();
        let detail = DetailValue::new(master.handle(), move |n: &u8| {
            Some(WritableValue::new(&detail_realm, *n).handle())
        });
        let _sub = detail.subscribe_value(Box::new(|_| {}));
        master.set(2).unwrap();

        let messages = messages.lock().expect("capture lock");
        for expected in ["union.activate", "union.deactivate", "detail.rebind"] {
            assert!(
                messages.iter().any(|m| m == expected),
                "expected {expected} event, saw {messages:?}"
            );
        }
    }
}
