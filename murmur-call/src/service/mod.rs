pub mod bootstrap;
pub mod wire;

pub use bootstrap::CallServiceBootstrap;
