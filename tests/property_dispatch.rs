//! Property-based tests for event dispatch and registration
//!
//! Dispatch order must follow descending priority with registration order
//! breaking ties, whatever priorities are chosen.

use parking_lot::Mutex;
use proptest::prelude::*;
use reinject::{event_source, Container, Event, EventInjector};
use std::sync::Arc;

#[derive(Default)]
struct Ticker {
    tick: Event<u8, usize>,
}

event_source!(Ticker { tick });

proptest! {
    #[test]
    fn dispatch_order_is_priority_then_registration(priorities in prop::collection::vec(-5i32..5, 1..24)) {
        let source = Arc::new(Ticker::default());
        let events = EventInjector::new("prop", 0);
        events.register_event_source(&source, "tick", "tick", false).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for (index, priority) in priorities.iter().copied().enumerate() {
            let order = order.clone();
            events
                .register_event_handler("tick", priority, move |_: u8| {
                    order.lock().push(index);
                    index
                })
                .unwrap();
        }

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by(|a, b| priorities[*b].cmp(&priorities[*a]).then(a.cmp(b)));

        let last = source.tick.raise(0);
        prop_assert_eq!(&*order.lock(), &expected);
        prop_assert_eq!(Some(&last), expected.last());
    }
}

proptest! {
    #[test]
    fn first_registration_of_a_key_wins(values in prop::collection::vec(any::<u64>(), 1..10)) {
        let container = Container::new("prop-first-wins");
        for value in &values {
            container.add_singleton(*value).unwrap();
        }
        prop_assert_eq!(*container.get_required::<u64>(), values[0]);

        let last = *values.last().unwrap();
        container.add::<u64>().overwrite(true).instance(last).unwrap();
        prop_assert_eq!(*container.get_required::<u64>(), last);
    }
}

proptest! {
    #[test]
    fn named_registrations_resolve_independently(count in 1usize..8) {
        const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let container = Container::new("prop-named");
        for (i, name) in NAMES.iter().take(count).enumerate() {
            container.add::<String>().named(*name).instance(format!("value-{}", i)).unwrap();
        }

        for (i, name) in NAMES.iter().take(count).enumerate() {
            let resolved = container.get_named_required::<String>(*name);
            prop_assert_eq!(resolved.as_str(), format!("value-{}", i));
        }
        prop_assert!(container.get::<String>().is_err());
        prop_assert_eq!(container.get_all_known_instances::<String>(false).count(), count);
    }
}
