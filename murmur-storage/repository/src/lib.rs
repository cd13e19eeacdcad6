//! Murmur 存储适配器
//!
//! - `InMemoryChatStore`：开发与单测使用
//! - `PostgresChatStore`：生产使用

pub mod memory;
pub mod postgres;

pub use memory::InMemoryChatStore;
pub use postgres::PostgresChatStore;
