pub mod schema;
pub mod service;
pub mod thread;

pub use service::ChatService;
pub use thread::{ThreadMerge, ThreadSubscription, ThreadUpdate, direction_query, subscribe_thread};
