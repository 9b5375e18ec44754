//! Persistence layer: the durable job broker and the Postgres repository
//! for every domain aggregate.

pub mod queue;
pub mod store;

pub use queue::{Job, JobBroker, RateLimiter, RetryPolicy, QUEUE_EVENTS, QUEUE_ROUTING, QUEUE_SYNC};
pub use store::Store;
