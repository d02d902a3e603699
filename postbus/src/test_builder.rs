//! Tests for EventBusBuilder functionality

#[cfg(test)]
mod tests {
    use crate::testing::MessageTracker;
    use crate::{
        consumer, ErrorHandling, EventBus, EventBusError, Events, MainLoop, StaticIndex, Task,
        ThreadMode,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Parent {
        seen: MessageTracker<String>,
    }

    #[consumer]
    impl Parent {
        #[subscribe]
        fn on_text(&self, text: &String) {
            self.seen.record(format!("parent:{text}"));
        }
    }

    #[derive(Default)]
    struct Child {
        parent: Parent,
        seen: MessageTracker<u32>,
    }

    #[consumer(inherit(parent: Parent))]
    impl Child {
        #[subscribe]
        fn on_number(&self, number: &u32) {
            self.seen.record(*number);
        }
    }

    #[test]
    fn test_event_bus_builder() {
        let bus = EventBus::builder()
            .with_event_inheritance(false)
            .with_exceptional_event_inheritance(true)
            .with_subscriber_error_handling(ErrorHandling::Rethrow)
            .with_handler_error_handling(ErrorHandling::Continue)
            .with_subscriber_exception_events(false)
            .with_no_subscriber_logging(false)
            .with_no_handler_events(false)
            .with_main_queue_budget(Duration::from_millis(5))
            .with_metrics(true)
            .build();

        let config = bus.config();
        assert!(!config.events.inheritance);
        assert!(config.exceptional.inheritance);
        assert_eq!(config.events.error_handling, ErrorHandling::Rethrow);
        assert_eq!(config.exceptional.error_handling, ErrorHandling::Continue);
        assert!(!config.events.send_failure_message);
        assert!(config.exceptional.send_failure_message);
        assert!(!config.events.log_no_consumer);
        assert!(!config.exceptional.send_no_consumer_message);
        assert!(config.events.send_no_consumer_message);
        assert_eq!(config.main_queue_budget, Duration::from_millis(5));
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_event_bus_builder_defaults() {
        let bus = EventBus::builder().build();
        let config = bus.config();

        assert!(config.events.inheritance);
        assert!(config.exceptional.inheritance);
        assert_eq!(config.events.error_handling, ErrorHandling::LogAndContinue);
        assert!(config.events.send_failure_message);
        assert!(config.events.log_no_consumer);
        assert!(config.events.send_no_consumer_message);
        assert!(!config.ignore_generated_index);
        assert!(!config.enable_metrics);
    }

    #[test]
    fn test_try_build_rejects_zero_main_budget() {
        let result = EventBus::builder()
            .with_main_queue_budget(Duration::ZERO)
            .try_build();
        assert!(matches!(result, Err(EventBusError::Configuration { .. })));

        let bus = EventBus::builder()
            .with_main_queue_budget(Duration::from_millis(2))
            .try_build()
            .unwrap();
        assert_eq!(bus.config().main_queue_budget, Duration::from_millis(2));
    }

    #[test]
    fn test_inherited_methods_are_registered() {
        let bus = EventBus::new();
        let child = Arc::new(Child::default());
        bus.register_subscriber(&child).unwrap();

        bus.post(String::from("hi")).unwrap();
        bus.post(7u32).unwrap();

        assert_eq!(child.parent.seen.values(), vec!["parent:hi".to_string()]);
        assert_eq!(child.seen.values(), vec![7]);
    }

    #[test]
    fn test_stop_scan_at_skips_parent_methods() {
        let bus = EventBus::builder().stop_scan_at::<Parent>().build();
        let child = Arc::new(Child::default());
        bus.register_subscriber(&child).unwrap();

        bus.post(String::from("hi")).unwrap();
        bus.post(7u32).unwrap();

        child.parent.seen.assert_count(0);
        child.seen.assert_count(1);
    }

    struct Indexed {
        seen: MessageTracker<u64>,
    }

    impl crate::Subscriber for Indexed {}

    fn indexed_record(indexed: &Indexed, value: &u64) {
        indexed.seen.record(*value);
    }

    #[test]
    fn test_subscriber_index_supplies_methods() {
        let index = StaticIndex::<Events>::new()
            .with_consumer::<Indexed>(|scan| {
                scan.on("record", indexed_record);
            })
            .unwrap();
        let bus = EventBus::builder().add_subscriber_index(index).build();
        let indexed = Arc::new(Indexed {
            seen: MessageTracker::new(),
        });

        bus.register_subscriber(&indexed).unwrap();
        bus.post(99u64).unwrap();
        assert_eq!(indexed.seen.values(), vec![99]);
    }

    #[test]
    fn test_ignored_index_leaves_type_without_methods() {
        let index = StaticIndex::<Events>::new()
            .with_consumer::<Indexed>(|scan| {
                scan.on("record", indexed_record);
            })
            .unwrap();
        let bus = EventBus::builder()
            .add_subscriber_index(index)
            .ignore_generated_index(true)
            .build();
        let indexed = Arc::new(Indexed {
            seen: MessageTracker::new(),
        });

        let error = bus.register_subscriber(&indexed).unwrap_err();
        assert!(matches!(error, EventBusError::NoConsumerMethods { .. }));
        assert!(!bus.is_registered_subscriber(&indexed));
    }

    #[derive(Default)]
    struct AsyncListener {
        seen: MessageTracker<u16>,
    }

    #[consumer]
    impl AsyncListener {
        #[subscribe(thread_mode = Async)]
        fn on_value(&self, value: &u16) {
            self.seen.record(*value);
        }
    }

    #[test]
    fn test_custom_executor_runs_async_deliveries() {
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();
        let bus = EventBus::builder()
            .with_executor(move |task: Task| {
                counter.fetch_add(1, Ordering::SeqCst);
                task();
            })
            .build();
        let listener = Arc::new(AsyncListener::default());
        bus.register_subscriber(&listener).unwrap();

        bus.post(3u16).unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(listener.seen.values(), vec![3]);
        assert_eq!(listener.seen.last_thread(), Some(thread::current().id()));
    }

    #[derive(Default)]
    struct MainListener {
        seen: MessageTracker<u8>,
    }

    #[consumer]
    impl MainListener {
        #[subscribe(thread_mode = Main)]
        fn on_value(&self, value: &u8) {
            self.seen.record(*value);
        }
    }

    #[test]
    fn test_main_thread_support_receives_main_deliveries() {
        let main_loop = MainLoop::spawn("builder-main").unwrap();
        let main_thread = main_loop.thread_id();
        let bus = EventBus::builder().with_main_thread(main_loop).build();
        let listener = Arc::new(MainListener::default());
        bus.register_subscriber(&listener).unwrap();

        bus.post(1u8).unwrap();
        assert!(listener.seen.wait_for(1, Duration::from_secs(5)));
        assert_eq!(listener.seen.last_thread(), Some(main_thread));
        assert_eq!(ThreadMode::Main.to_string(), "Main");
    }
}
