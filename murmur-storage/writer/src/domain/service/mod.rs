pub mod delivery_service;

pub use delivery_service::{MessageDeliveryService, REPLY_CHAIN_DEPTH};
