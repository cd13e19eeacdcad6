pub mod notifier;
pub mod presence;

pub use notifier::{ChatNotifier, DEFAULT_FANOUT_QUEUE_CAPACITY};
pub use presence::PresenceService;
