use crate::telemetry::LinkEvent;

pub trait EventPublisher {
    fn publish(&mut self, event: &LinkEvent);
}
