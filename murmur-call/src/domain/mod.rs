pub mod model;
pub mod service;

pub use model::{LeaveSummary, SignalKind};
pub use service::{DirectCallRelay, GroupCallSessionManager};
