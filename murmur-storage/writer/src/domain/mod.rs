pub mod model;
pub mod service;

pub use model::{DecodedDelivery, DeliveryOutcome, DeliveryScope};
pub use service::MessageDeliveryService;
