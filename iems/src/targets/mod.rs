pub mod console;
pub mod event_publisher;
pub mod history;
pub mod mqtt;
