pub mod backoff;
pub mod fake;
pub mod frame;
pub mod link;
