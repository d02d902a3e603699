//! Tests for hierarchy matching of events and exceptional events

#[cfg(test)]
mod tests {
    use crate::testing::MessageTracker;
    use crate::{consumer, message_interface, AnyMessage, EventBus, Message};
    use std::sync::Arc;

    pub trait Shape: 'static {
        fn area(&self) -> f64;
    }

    pub trait Labeled: 'static {
        fn label(&self) -> String;
    }

    message_interface!(Shape, Labeled);

    #[derive(Message, Debug)]
    #[message(implements(dyn Labeled))]
    struct Figure {
        label: String,
    }

    impl Labeled for Figure {
        fn label(&self) -> String {
            self.label.clone()
        }
    }

    #[derive(Message, Debug)]
    #[message(implements(dyn Shape))]
    struct Square {
        #[message(extends)]
        figure: Figure,
        side: f64,
    }

    impl Shape for Square {
        fn area(&self) -> f64 {
            self.side * self.side
        }
    }

    #[derive(Default)]
    struct Observer {
        seen: MessageTracker<String>,
    }

    #[consumer]
    impl Observer {
        #[subscribe]
        fn on_square(&self, square: &Square) {
            self.seen.record(format!("square:{}", square.side));
        }

        #[subscribe]
        fn on_figure(&self, figure: &Figure) {
            self.seen.record(format!("figure:{}", figure.label));
        }

        #[subscribe]
        fn on_shape(&self, shape: &dyn Shape) {
            self.seen.record(format!("shape:{}", shape.area()));
        }

        #[subscribe]
        fn on_labeled(&self, labeled: &dyn Labeled) {
            self.seen.record(format!("labeled:{}", labeled.label()));
        }

        #[subscribe]
        fn on_any(&self, message: &dyn AnyMessage) {
            self.seen.record(format!("any:{}", message.is::<Square>()));
        }
    }

    fn square() -> Square {
        Square {
            figure: Figure {
                label: "tile".to_string(),
            },
            side: 2.0,
        }
    }

    #[test]
    fn test_event_reaches_whole_hierarchy_in_order() {
        let bus = EventBus::new();
        let observer = Arc::new(Observer::default());
        bus.register_subscriber(&observer).unwrap();

        bus.post(square()).unwrap();
        assert_eq!(
            observer.seen.values(),
            vec![
                "square:2".to_string(),
                "figure:tile".to_string(),
                "shape:4".to_string(),
                "labeled:tile".to_string(),
                "any:true".to_string(),
            ]
        );
    }

    #[test]
    fn test_parent_event_does_not_reach_child_consumers() {
        let bus = EventBus::new();
        let observer = Arc::new(Observer::default());
        bus.register_subscriber(&observer).unwrap();

        bus.post(Figure {
            label: "plain".to_string(),
        })
        .unwrap();
        assert_eq!(
            observer.seen.values(),
            vec![
                "figure:plain".to_string(),
                "labeled:plain".to_string(),
                "any:false".to_string(),
            ]
        );
    }

    #[test]
    fn test_disabled_inheritance_matches_exact_type_only() {
        let bus = EventBus::builder().with_event_inheritance(false).build();
        let observer = Arc::new(Observer::default());
        bus.register_subscriber(&observer).unwrap();

        bus.post(square()).unwrap();
        assert_eq!(observer.seen.values(), vec!["square:2".to_string()]);
    }

    #[derive(Default)]
    struct FigureOnly {
        seen: MessageTracker<String>,
    }

    #[consumer]
    impl FigureOnly {
        #[subscribe]
        fn on_figure(&self, figure: &Figure) {
            self.seen.record(figure.label.clone());
        }
    }

    #[test]
    fn test_has_subscriber_for_follows_inheritance() {
        let bus = EventBus::new();
        let strict = EventBus::builder().with_event_inheritance(false).build();
        let figures = Arc::new(FigureOnly::default());
        bus.register_subscriber(&figures).unwrap();
        strict.register_subscriber(&figures).unwrap();

        assert!(bus.has_subscriber_for::<Figure>());
        assert!(bus.has_subscriber_for::<Square>());
        assert!(!bus.has_subscriber_for::<u8>());
        assert!(strict.has_subscriber_for::<Figure>());
        assert!(!strict.has_subscriber_for::<Square>());

        bus.unregister_subscriber(&figures);
        assert!(!bus.has_subscriber_for::<Square>());
    }

    #[derive(Default)]
    struct ShapeHandler {
        seen: MessageTracker<f64>,
    }

    #[consumer]
    impl ShapeHandler {
        #[handle]
        fn on_shape(&self, shape: &dyn Shape) {
            self.seen.record(shape.area());
        }
    }

    #[test]
    fn test_exceptional_inheritance_is_configured_separately() {
        let bus = EventBus::builder()
            .with_exceptional_event_inheritance(false)
            .with_no_handler_events(false)
            .build();
        let handler = Arc::new(ShapeHandler::default());
        bus.register_handler(&handler).unwrap();

        bus.throw_exception(square()).unwrap();
        handler.seen.assert_count(0);
        assert!(!bus.has_handler_for::<Square>());

        let lenient = EventBus::new();
        lenient.register_handler(&handler).unwrap();
        lenient.throw_exception(square()).unwrap();
        assert_eq!(handler.seen.values(), vec![4.0]);
        assert!(lenient.has_handler_for::<Square>());
    }
}
