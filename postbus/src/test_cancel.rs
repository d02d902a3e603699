//! Tests for delivery cancellation

#[cfg(test)]
mod tests {
    use crate::testing::MessageTracker;
    use crate::{consumer, AnyMessage, CancellationError, EventBus, EventBusError};
    use std::sync::Arc;

    struct Gate {
        bus: EventBus,
        outcomes: MessageTracker<Result<(), CancellationError>>,
    }

    #[consumer]
    impl Gate {
        #[subscribe(priority = 10)]
        fn on_text(&self, text: &String) {
            if text.starts_with("stop") {
                let outcome = self
                    .bus
                    .cancel_event_delivery(text)
                    .map_err(|error| error.as_cancellation().cloned().unwrap());
                self.outcomes.record(outcome);
            }
        }

        #[subscribe(priority = 10)]
        fn on_number(&self, number: &u32) {
            let stranger = *number + 1;
            let outcome = self
                .bus
                .cancel_event_delivery(&stranger)
                .map_err(|error| error.as_cancellation().cloned().unwrap());
            self.outcomes.record(outcome);
        }

        #[subscribe(thread_mode = Main)]
        fn on_flag(&self, flag: &bool) {
            let outcome = self
                .bus
                .cancel_event_delivery(flag)
                .map_err(|error| error.as_cancellation().cloned().unwrap());
            self.outcomes.record(outcome);
        }
    }

    #[derive(Default)]
    struct Behind {
        seen: MessageTracker<String>,
    }

    #[consumer]
    impl Behind {
        #[subscribe]
        fn on_text(&self, text: &String) {
            self.seen.record(text.clone());
        }

        #[subscribe]
        fn on_any(&self, message: &dyn AnyMessage) {
            self.seen.record(format!("any:{}", message.type_name()));
        }
    }

    fn setup() -> (EventBus, Arc<Gate>, Arc<Behind>) {
        let bus = EventBus::builder().with_no_subscriber_events(false).build();
        let gate = Arc::new(Gate {
            bus: bus.clone(),
            outcomes: MessageTracker::new(),
        });
        let behind = Arc::new(Behind::default());
        bus.register_subscriber(&gate).unwrap();
        bus.register_subscriber(&behind).unwrap();
        (bus, gate, behind)
    }

    #[test]
    fn test_higher_priority_cancels_remaining_route() {
        let (bus, gate, behind) = setup();

        bus.post(String::from("stop here")).unwrap();
        assert_eq!(gate.outcomes.values(), vec![Ok(())]);
        behind.seen.assert_count(0);

        bus.post(String::from("go")).unwrap();
        assert_eq!(
            behind.seen.values(),
            vec!["go".to_string(), "any:alloc::string::String".to_string()]
        );
    }

    #[test]
    fn test_cancel_outside_delivery_is_rejected() {
        let (bus, _gate, _behind) = setup();
        let error = bus.cancel_event_delivery(&String::from("idle")).unwrap_err();
        assert!(matches!(
            error,
            EventBusError::IllegalCancellation(CancellationError::NotPosting)
        ));
        assert!(!bus.events().is_draining());
    }

    #[test]
    fn test_cancel_of_another_message_is_rejected() {
        let (bus, gate, behind) = setup();
        bus.post(41u32).unwrap();

        assert_eq!(
            gate.outcomes.values(),
            vec![Err(CancellationError::NotCurrentMessage)]
        );
        assert_eq!(behind.seen.values(), vec!["any:u32".to_string()]);
    }

    #[test]
    fn test_cancel_from_non_posting_mode_is_rejected() {
        let (bus, gate, behind) = setup();
        bus.post(true).unwrap();

        assert_eq!(
            gate.outcomes.values(),
            vec![Err(CancellationError::NotPostingThreadMode(crate::ThreadMode::Main))]
        );
        behind.seen.assert_count(1);
    }

    #[test]
    fn test_exceptional_channel_cancels_independently() {
        let bus = EventBus::new();
        let error = bus.cancel_exceptional_event_delivery(&5u8).unwrap_err();
        assert!(error.as_cancellation().is_some());
    }
}
