//! Tests for consumer failures and undelivered messages

#[cfg(test)]
mod tests {
    use crate::testing::MessageTracker;
    use crate::{
        consumer, ConsumerError, ErrorHandling, EventBus, EventBusError, HandlerExceptionEvent,
        NoHandlerEvent, NoSubscriberEvent, SubscriberExceptionEvent,
    };
    use std::sync::Arc;

    #[derive(Default)]
    struct Faulty {
        attempts: MessageTracker<i32>,
    }

    #[consumer]
    impl Faulty {
        #[subscribe]
        fn on_number(&self, number: &i32) -> Result<(), String> {
            self.attempts.record(*number);
            if *number < 0 {
                return Err(format!("negative: {number}"));
            }
            Ok(())
        }

        #[subscribe]
        fn on_flag(&self, _flag: &bool) {
            panic!("flag handling exploded");
        }
    }

    #[derive(Default)]
    struct FailureWatcher {
        causes: MessageTracker<String>,
        consumers: MessageTracker<&'static str>,
    }

    #[consumer]
    impl FailureWatcher {
        #[subscribe]
        fn on_failure(&self, failure: &SubscriberExceptionEvent) {
            self.causes.record(failure.cause().to_string());
            self.consumers.record(failure.consumer_type_name());
        }
    }

    #[test]
    fn test_failure_is_posted_as_event() {
        let bus = EventBus::new();
        let faulty = Arc::new(Faulty::default());
        let watcher = Arc::new(FailureWatcher::default());
        bus.register_subscriber(&faulty).unwrap();
        bus.register_subscriber(&watcher).unwrap();

        bus.post(-1i32).unwrap();
        bus.post(true).unwrap();
        bus.post(2i32).unwrap();

        assert_eq!(
            watcher.causes.values(),
            vec![
                "negative: -1".to_string(),
                "consumer panicked: flag handling exploded".to_string(),
            ]
        );
        assert!(watcher.consumers.values()[0].ends_with("Faulty"));
        assert_eq!(faulty.attempts.values(), vec![-1, 2]);
    }

    #[test]
    fn test_failure_events_can_be_disabled() {
        let bus = EventBus::builder()
            .with_subscriber_exception_events(false)
            .with_subscriber_error_handling(ErrorHandling::Continue)
            .build();
        let faulty = Arc::new(Faulty::default());
        let watcher = Arc::new(FailureWatcher::default());
        bus.register_subscriber(&faulty).unwrap();
        bus.register_subscriber(&watcher).unwrap();

        bus.post(-1i32).unwrap();
        watcher.causes.assert_count(0);
    }

    #[derive(Default)]
    struct Queuer {
        bus: Option<EventBus>,
        seen: MessageTracker<String>,
    }

    #[consumer]
    impl Queuer {
        #[subscribe]
        fn on_text(&self, text: &String) {
            self.seen.record(text.clone());
            if let Some(bus) = &self.bus {
                bus.post(-5i32).unwrap();
                bus.post(String::from("queued")).unwrap();
            }
        }
    }

    #[test]
    fn test_rethrow_returns_failure_and_discards_queue() {
        let bus = EventBus::builder()
            .with_subscriber_error_handling(ErrorHandling::Rethrow)
            .build();
        let faulty = Arc::new(Faulty::default());
        let queuer = Arc::new(Queuer {
            bus: Some(bus.clone()),
            seen: MessageTracker::new(),
        });
        let watcher = Arc::new(FailureWatcher::default());
        bus.register_subscriber(&faulty).unwrap();
        bus.register_subscriber(&queuer).unwrap();
        bus.register_subscriber(&watcher).unwrap();

        let error = bus.post(String::from("first")).unwrap_err();
        match error {
            EventBusError::ConsumerExecutionFailure {
                role,
                message,
                cause,
                ..
            } => {
                assert_eq!(role, "subscriber");
                assert_eq!(message, "i32");
                assert!(matches!(*cause, ConsumerError::Failed(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(queuer.seen.values(), vec!["first".to_string()]);
        watcher.causes.assert_count(0);
        assert!(!bus.events().is_draining());

        bus.post(String::from("second")).unwrap_err();
        assert_eq!(queuer.seen.last().as_deref(), Some("second"));
    }

    #[derive(Default)]
    struct BrokenWatcher {
        calls: MessageTracker<()>,
    }

    #[consumer]
    impl BrokenWatcher {
        #[subscribe]
        fn on_failure(&self, _failure: &SubscriberExceptionEvent) -> Result<(), String> {
            self.calls.record(());
            Err("watcher broke too".to_string())
        }
    }

    #[test]
    fn test_failure_while_handling_failure_does_not_cascade() {
        let bus = EventBus::new();
        let faulty = Arc::new(Faulty::default());
        let broken = Arc::new(BrokenWatcher::default());
        bus.register_subscriber(&faulty).unwrap();
        bus.register_subscriber(&broken).unwrap();

        bus.post(-3i32).unwrap();
        broken.calls.assert_count(1);
        assert!(!bus.events().is_draining());
    }

    #[derive(Default)]
    struct Orphans {
        events: MessageTracker<&'static str>,
        exceptional: MessageTracker<&'static str>,
    }

    #[consumer]
    impl Orphans {
        #[subscribe]
        fn on_no_subscriber(&self, missing: &NoSubscriberEvent) {
            self.events.record(missing.message().type_name());
        }

        #[handle]
        fn on_no_handler(&self, missing: &NoHandlerEvent) {
            self.exceptional.record(missing.message().type_name());
        }
    }

    #[test]
    fn test_undelivered_messages_are_wrapped() {
        let bus = EventBus::new();
        let orphans = Arc::new(Orphans::default());
        bus.register_subscriber(&orphans).unwrap();
        bus.register_handler(&orphans).unwrap();

        bus.post(1u64).unwrap();
        bus.throw_exception(String::from("lost")).unwrap();

        assert_eq!(orphans.events.values(), vec!["u64"]);
        assert_eq!(orphans.exceptional.values(), vec!["alloc::string::String"]);
    }

    #[test]
    fn test_undelivered_wrapping_can_be_disabled() {
        let bus = EventBus::builder()
            .with_no_subscriber_events(false)
            .with_no_subscriber_logging(false)
            .build();
        let orphans = Arc::new(Orphans::default());
        bus.register_subscriber(&orphans).unwrap();

        bus.post(1u64).unwrap();
        orphans.events.assert_count(0);
    }

    #[derive(Default)]
    struct FaultyHandler {
        causes: MessageTracker<String>,
    }

    #[consumer]
    impl FaultyHandler {
        #[handle]
        fn on_error(&self, error: &String) -> Result<(), String> {
            Err(format!("cannot handle {error}"))
        }

        #[handle]
        fn on_failure(&self, failure: &HandlerExceptionEvent) {
            self.causes.record(failure.cause().to_string());
        }
    }

    #[test]
    fn test_handler_failures_stay_on_exceptional_channel() {
        let bus = EventBus::new();
        let handler = Arc::new(FaultyHandler::default());
        let watcher = Arc::new(FailureWatcher::default());
        bus.register_handler(&handler).unwrap();
        bus.register_subscriber(&watcher).unwrap();

        bus.throw_exception(String::from("oops")).unwrap();

        assert_eq!(handler.causes.values(), vec!["cannot handle oops".to_string()]);
        watcher.causes.assert_count(0);
    }

    #[derive(Default)]
    struct PickyLatecomer {
        low: MessageTracker<u8>,
        other: MessageTracker<u16>,
    }

    #[consumer]
    impl PickyLatecomer {
        #[subscribe(sticky, priority = 5)]
        fn reject(&self, _value: &u8) -> Result<(), String> {
            Err(String::from("stale value"))
        }

        #[subscribe(sticky)]
        fn accept(&self, value: &u8) {
            self.low.record(*value);
        }

        #[subscribe(sticky, priority = -1)]
        fn accept_other(&self, value: &u16) {
            self.other.record(*value);
        }
    }

    #[test]
    fn test_rethrown_replay_failure_does_not_skip_other_replays() {
        let bus = EventBus::builder()
            .with_subscriber_error_handling(ErrorHandling::Rethrow)
            .with_no_subscriber_events(false)
            .build();
        bus.post_sticky(4u8).unwrap();
        bus.post_sticky(9u16).unwrap();

        let latecomer = Arc::new(PickyLatecomer::default());
        let error = bus.register_subscriber(&latecomer).unwrap_err();
        assert!(matches!(
            error,
            EventBusError::ConsumerExecutionFailure { message: "u8", .. }
        ));

        assert!(bus.is_registered_subscriber(&latecomer));
        assert_eq!(latecomer.low.values(), vec![4]);
        assert_eq!(latecomer.other.values(), vec![9]);
    }
}
