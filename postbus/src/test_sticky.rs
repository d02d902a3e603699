//! Tests for sticky events and sticky exceptional events

#[cfg(test)]
mod tests {
    use crate::testing::MessageTracker;
    use crate::{consumer, EventBus, Message};
    use std::sync::Arc;

    #[derive(Message, Debug, Clone, PartialEq)]
    struct Location {
        city: String,
    }

    #[derive(Message, Debug, Clone, PartialEq)]
    struct Precise {
        #[message(extends)]
        location: Location,
        accuracy: u32,
    }

    #[derive(Default)]
    struct StickyListener {
        cities: MessageTracker<String>,
    }

    #[consumer]
    impl StickyListener {
        #[subscribe(sticky)]
        fn on_location(&self, location: &Location) {
            self.cities.record(location.city.clone());
        }
    }

    #[derive(Default)]
    struct PlainListener {
        cities: MessageTracker<String>,
    }

    #[consumer]
    impl PlainListener {
        #[subscribe]
        fn on_location(&self, location: &Location) {
            self.cities.record(location.city.clone());
        }
    }

    fn location(city: &str) -> Location {
        Location {
            city: city.to_string(),
        }
    }

    #[test]
    fn test_sticky_event_is_replayed_on_registration() {
        let bus = EventBus::new();
        bus.post_sticky(location("Berlin")).unwrap();
        bus.post_sticky(location("Paris")).unwrap();

        let sticky = Arc::new(StickyListener::default());
        let plain = Arc::new(PlainListener::default());
        bus.register_subscriber(&sticky).unwrap();
        bus.register_subscriber(&plain).unwrap();

        assert_eq!(sticky.cities.values(), vec!["Paris".to_string()]);
        plain.cities.assert_count(0);

        bus.post(location("Rome")).unwrap();
        assert_eq!(sticky.cities.last().as_deref(), Some("Rome"));
        assert_eq!(plain.cities.values(), vec!["Rome".to_string()]);
    }

    #[test]
    fn test_get_and_remove_sticky_event() {
        let bus = EventBus::new();
        assert!(bus.get_sticky_event::<Location>().is_none());

        bus.post_sticky(location("Oslo")).unwrap();
        assert_eq!(bus.get_sticky_event::<Location>().unwrap().city, "Oslo");

        assert!(!bus.remove_sticky_event_instance(&location("Lima")));
        assert!(bus.get_sticky_event::<Location>().is_some());
        assert!(bus.remove_sticky_event_instance(&location("Oslo")));
        assert!(bus.get_sticky_event::<Location>().is_none());

        bus.post_sticky(location("Kyiv")).unwrap();
        bus.post_sticky(5u32).unwrap();
        assert_eq!(bus.remove_sticky_event::<Location>().unwrap().city, "Kyiv");
        assert!(bus.remove_sticky_event::<Location>().is_none());

        bus.remove_all_sticky_events();
        assert!(bus.get_sticky_event::<u32>().is_none());
    }

    #[test]
    fn test_sticky_store_is_keyed_by_exact_type() {
        let bus = EventBus::new();
        bus.post_sticky(Precise {
            location: location("Quito"),
            accuracy: 3,
        })
        .unwrap();

        assert!(bus.get_sticky_event::<Location>().is_none());
        assert_eq!(bus.get_sticky_event::<Precise>().unwrap().accuracy, 3);

        let sticky = Arc::new(StickyListener::default());
        bus.register_subscriber(&sticky).unwrap();
        assert_eq!(sticky.cities.values(), vec!["Quito".to_string()]);
    }

    #[test]
    fn test_sticky_replay_respects_inheritance_setting() {
        let bus = EventBus::builder().with_event_inheritance(false).build();
        bus.post_sticky(Precise {
            location: location("Quito"),
            accuracy: 3,
        })
        .unwrap();

        let sticky = Arc::new(StickyListener::default());
        bus.register_subscriber(&sticky).unwrap();
        sticky.cities.assert_count(0);
    }

    #[derive(Default)]
    struct Ranked {
        order: MessageTracker<&'static str>,
    }

    #[consumer]
    impl Ranked {
        #[subscribe(sticky, priority = 1)]
        fn low(&self, _value: &u8) {
            self.order.record("low");
        }

        #[subscribe(sticky, priority = 10)]
        fn high(&self, _value: &u16) {
            self.order.record("high");
        }
    }

    #[test]
    fn test_sticky_replays_follow_priority() {
        let bus = EventBus::new();
        bus.post_sticky(1u8).unwrap();
        bus.post_sticky(1u16).unwrap();

        let ranked = Arc::new(Ranked::default());
        bus.register_subscriber(&ranked).unwrap();
        assert_eq!(ranked.order.values(), vec!["high", "low"]);
    }

    #[derive(Default)]
    struct StickyHandler {
        errors: MessageTracker<String>,
    }

    #[consumer]
    impl StickyHandler {
        #[handle(sticky)]
        fn on_error(&self, error: &String) {
            self.errors.record(error.clone());
        }
    }

    #[test]
    fn test_sticky_exceptional_events_are_separate() {
        let bus = EventBus::new();
        bus.throw_sticky(String::from("disk full")).unwrap();
        bus.post_sticky(String::from("event")).unwrap();

        let handler = Arc::new(StickyHandler::default());
        bus.register_handler(&handler).unwrap();
        assert_eq!(handler.errors.values(), vec!["disk full".to_string()]);

        assert_eq!(
            bus.get_sticky_exceptional_event::<String>().as_deref().map(String::as_str),
            Some("disk full")
        );
        assert!(bus.remove_sticky_exceptional_event_instance(&String::from("disk full")));
        assert!(bus.get_sticky_exceptional_event::<String>().is_none());
        assert_eq!(bus.get_sticky_event::<String>().as_deref().map(String::as_str), Some("event"));

        bus.throw_sticky(String::from("again")).unwrap();
        assert!(bus.remove_sticky_exceptional_event::<String>().is_some());
        bus.throw_sticky(String::from("last")).unwrap();
        bus.remove_all_sticky_exceptional_events();
        assert!(bus.get_sticky_exceptional_event::<String>().is_none());
    }

    #[test]
    fn test_footprint_tracks_sticky_entries() {
        let bus = EventBus::new();
        bus.post_sticky(1u8).unwrap();
        bus.post_sticky(2u8).unwrap();
        assert_eq!(bus.events().footprint().2, 1);
        assert_eq!(bus.exceptional().footprint().2, 0);
    }
}
