pub mod direct_relay;
pub mod session_manager;

pub use direct_relay::DirectCallRelay;
pub use session_manager::GroupCallSessionManager;
