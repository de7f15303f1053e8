//! Synchronization: the pass engine, the request dispatcher and the feedback
//! contract.

mod dispatcher;
mod engine;
mod feedback;
mod report;
pub(crate) mod workspace;


pub use dispatcher::Dispatcher;
pub use feedback::{NoFeedback, SyncFeedback};
pub use report::{SyncFailure, SyncReport};

pub(crate) use engine::synchronize;
