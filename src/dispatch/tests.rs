use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::{Dispatcher, StateListeners};
use crate::messager::SynchronizeHint;
use crate::topic::{Topic, TopicRegistry};

fn topics() -> (Topic<String>, Topic<u32>) {
    let mut builder = TopicRegistry::builder();
    let chat = builder.declare_topic::<String>("test.chat").unwrap();
    let count = builder.declare_topic::<u32>("test.count").unwrap();
    (chat, count)
}

#[test]
fn test_dispatch_in_registration_order() {
    let (chat, _) = topics();
    let dispatcher = Dispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let seen = seen.clone();
        dispatcher.add_listener(&chat, move |msg: &String, _| {
            seen.lock().unwrap().push(format!("{tag}:{msg}"));
        });
    }

    let delivered = dispatcher.dispatch(chat.name(), &"hi".to_string(), SynchronizeHint::None);
    assert_eq!(delivered, 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first:hi", "second:hi", "third:hi"]
    );
}

#[test]
fn test_dispatch_only_reaches_own_topic() {
    let (chat, count) = topics();
    let dispatcher = Dispatcher::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    dispatcher.add_listener(&count, move |n: &u32, _| {
        h.fetch_add(*n as usize, Ordering::SeqCst);
    });

    assert_eq!(
        dispatcher.dispatch(chat.name(), &"x".to_string(), SynchronizeHint::None),
        0
    );
    dispatcher.dispatch(count.name(), &5u32, SynchronizeHint::None);
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[test]
fn test_remove_listener() {
    let (chat, _) = topics();
    let dispatcher = Dispatcher::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    let handle = dispatcher.add_listener(&chat, move |_: &String, _| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(handle.topic(), "test.chat");
    assert_eq!(dispatcher.listener_count("test.chat"), 1);

    assert!(dispatcher.remove_listener(&handle));
    assert!(!dispatcher.remove_listener(&handle));
    assert_eq!(dispatcher.listener_count("test.chat"), 0);

    dispatcher.dispatch(chat.name(), &"x".to_string(), SynchronizeHint::None);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_listener_added_during_dispatch_waits_for_next_one() {
    let (chat, _) = topics();
    let dispatcher = Arc::new(Dispatcher::new());
    let late_hits = Arc::new(AtomicUsize::new(0));

    let d = dispatcher.clone();
    let late = late_hits.clone();
    let topic = chat.clone();
    let added = Arc::new(AtomicUsize::new(0));
    dispatcher.add_listener(&chat, move |_: &String, _| {
        if added.fetch_add(1, Ordering::SeqCst) == 0 {
            let late = late.clone();
            d.add_listener(&topic, move |_: &String, _| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    dispatcher.dispatch(chat.name(), &"one".to_string(), SynchronizeHint::None);
    assert_eq!(late_hits.load(Ordering::SeqCst), 0);

    dispatcher.dispatch(chat.name(), &"two".to_string(), SynchronizeHint::None);
    assert_eq!(late_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_removed_during_dispatch_still_gets_that_dispatch() {
    let (chat, _) = topics();
    let dispatcher = Arc::new(Dispatcher::new());
    let second_hits = Arc::new(AtomicUsize::new(0));
    let second_handle = Arc::new(Mutex::new(None));

    let d = dispatcher.clone();
    let slot = second_handle.clone();
    dispatcher.add_listener(&chat, move |_: &String, _| {
        if let Some(handle) = slot.lock().unwrap().take() {
            d.remove_listener(&handle);
        }
    });
    let h = second_hits.clone();
    let handle = dispatcher.add_listener(&chat, move |_: &String, _| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    *second_handle.lock().unwrap() = Some(handle);

    dispatcher.dispatch(chat.name(), &"one".to_string(), SynchronizeHint::None);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);

    dispatcher.dispatch(chat.name(), &"two".to_string(), SynchronizeHint::None);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_listener_does_not_stop_delivery() {
    let (chat, _) = topics();
    let dispatcher = Dispatcher::new();
    let hits = Arc::new(AtomicUsize::new(0));

    dispatcher.add_listener(&chat, |_: &String, _| panic!("listener failure"));
    let h = hits.clone();
    dispatcher.add_listener(&chat, move |_: &String, _| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let delivered = dispatcher.dispatch(chat.name(), &"x".to_string(), SynchronizeHint::None);
    assert_eq!(delivered, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // still usable afterwards
    dispatcher.dispatch(chat.name(), &"y".to_string(), SynchronizeHint::None);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_hint_is_passed_through() {
    let (chat, _) = topics();
    let dispatcher = Dispatcher::new();
    let hints = Arc::new(Mutex::new(Vec::new()));

    let seen = hints.clone();
    dispatcher.add_listener(&chat, move |_: &String, hint| seen.lock().unwrap().push(hint));

    dispatcher.dispatch(chat.name(), &"a".to_string(), SynchronizeHint::Synchronous);
    dispatcher.dispatch(chat.name(), &"b".to_string(), SynchronizeHint::Asynchronous);
    assert_eq!(
        *hints.lock().unwrap(),
        vec![SynchronizeHint::Synchronous, SynchronizeHint::Asynchronous]
    );
}

#[test]
fn test_concurrent_dispatch_and_registration() {
    let (_, count) = topics();
    let dispatcher = Arc::new(Dispatcher::new());
    let stable_hits = Arc::new(AtomicUsize::new(0));

    let h = stable_hits.clone();
    dispatcher.add_listener(&count, move |_: &u32, _| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            let topic = count.clone();
            thread::spawn(move || {
                for i in 0..250u32 {
                    dispatcher.dispatch(topic.name(), &i, SynchronizeHint::None);
                }
            })
        })
        .collect();

    let churn = {
        let dispatcher = dispatcher.clone();
        let topic = count.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let handle = dispatcher.add_listener(&topic, |_: &u32, _| {});
                dispatcher.remove_listener(&handle);
            }
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    churn.join().unwrap();

    assert_eq!(stable_hits.load(Ordering::SeqCst), 1000);
    assert_eq!(dispatcher.listener_count(count.name()), 1);
}

#[test]
fn test_clear_drops_all_listeners() {
    let (chat, count) = topics();
    let dispatcher = Dispatcher::new();
    dispatcher.add_listener(&chat, |_: &String, _| {});
    dispatcher.add_listener(&count, |_: &u32, _| {});

    dispatcher.clear();
    assert_eq!(dispatcher.listener_count(chat.name()), 0);
    assert_eq!(dispatcher.listener_count(count.name()), 0);
}

#[test]
fn test_state_listeners() {
    let listeners = StateListeners::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    let handle = listeners.add(move |connected| s.lock().unwrap().push(connected));
    listeners.add(|_| panic!("bad state listener"));
    assert_eq!(listeners.len(), 2);

    listeners.notify(true);
    listeners.notify(false);
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);

    assert!(listeners.remove(handle));
    assert!(!listeners.remove(handle));
    listeners.notify(true);
    assert_eq!(seen.lock().unwrap().len(), 2);

    listeners.clear();
    assert!(listeners.is_empty());
}
