pub mod wire;

pub use wire::PublisherComponents;
