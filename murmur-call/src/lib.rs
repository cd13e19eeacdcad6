//! Murmur 群通话服务
//!
//! 通话生命周期（开始、加入、离开、结束）、媒体状态、连接质量与 WebRTC 信令转发，
//! 以及一对一通话的信令中转。
//! 媒体本身不经过服务端。

pub mod application;
pub mod config;
pub mod domain;
pub mod service;

pub use application::CallCommandHandler;
pub use config::CallConfig;
pub use domain::{DirectCallRelay, GroupCallSessionManager, LeaveSummary, SignalKind};
pub use service::CallServiceBootstrap;
pub use service::wire::CallComponents;
