pub mod hub;

pub use hub::InMemoryPushHub;
