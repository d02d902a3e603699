//! Tests for delivery metrics

#[cfg(test)]
mod tests {
    use crate::{consumer, EventBus};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counter;

    #[consumer]
    impl Counter {
        #[subscribe(priority = 5)]
        fn on_number(&self, number: &i32) -> Result<(), String> {
            if *number < 0 {
                return Err("negative".to_string());
            }
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }

        #[subscribe]
        fn on_other(&self, number: &i32) {
            let _ = number;
        }
    }

    fn bus_with_counter() -> (EventBus, Arc<Counter>) {
        let bus = EventBus::builder()
            .with_metrics(true)
            .with_subscriber_exception_events(false)
            .build();
        let counter = Arc::new(Counter);
        bus.register_subscriber(&counter).unwrap();
        (bus, counter)
    }

    #[test]
    fn test_metrics_disabled_by_default() {
        assert!(EventBus::new().metrics().is_none());
    }

    #[test]
    fn test_deliveries_are_counted() {
        let (bus, _counter) = bus_with_counter();
        bus.post(1i32).unwrap();
        bus.post(2i32).unwrap();

        let snapshot = bus.metrics().unwrap().snapshot();
        assert_eq!(snapshot.events.posted, 2);
        assert_eq!(snapshot.events.delivered, 4);
        assert_eq!(snapshot.events.failures, 0);
        assert!(snapshot.events.max_invocation_time >= Duration::from_millis(1));
        assert!(snapshot.events.average_invocation_time() <= snapshot.events.max_invocation_time);

        let stats = snapshot.events.messages["i32"];
        assert_eq!(stats.posted, 2);
        assert_eq!(stats.delivered, 4);
        assert_eq!(snapshot.exceptional.posted, 0);
    }

    #[test]
    fn test_failures_and_success_rate() {
        let (bus, _counter) = bus_with_counter();
        bus.post(-1i32).unwrap();
        bus.post(1i32).unwrap();

        let snapshot = bus.metrics().unwrap().snapshot();
        assert_eq!(snapshot.events.delivered, 4);
        assert_eq!(snapshot.events.failures, 1);
        assert_eq!(snapshot.events.success_rate(), 0.75);
        assert_eq!(snapshot.events.messages["i32"].failures, 1);
    }

    #[test]
    fn test_unheard_messages_and_reset() {
        let (bus, _counter) = bus_with_counter();
        bus.throw_exception(String::from("nobody")).unwrap();

        let metrics = bus.metrics().unwrap();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.exceptional.posted, 2);
        assert_eq!(snapshot.exceptional.no_consumer, 2);
        assert_eq!(snapshot.events.no_consumer, 0);

        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.exceptional.posted, 0);
        assert!(snapshot.exceptional.messages.is_empty());
    }

    struct Stopper {
        bus: EventBus,
    }

    #[consumer]
    impl Stopper {
        #[subscribe(priority = 100)]
        fn on_number(&self, number: &i32) {
            self.bus.cancel_event_delivery(number).unwrap();
        }
    }

    #[test]
    fn test_cancellations_are_counted() {
        let (bus, _counter) = bus_with_counter();
        let stopper = Arc::new(Stopper { bus: bus.clone() });
        bus.register_subscriber(&stopper).unwrap();

        bus.post(3i32).unwrap();
        let snapshot = bus.metrics().unwrap().snapshot();
        assert_eq!(snapshot.events.canceled, 1);
        assert_eq!(snapshot.events.delivered, 1);
    }
}
