//! A shared, multiplexed HTTP engine: one background thread drives an
//! arbitrary number of concurrent transfers through a readiness-based OS
//! poller (epoll on Linux, kqueue on macOS) and `curl`'s multi interface.
//! Callers submit a request from any thread and block on a one-shot slot
//! until the Engine publishes its response.
//!
//! The [`client`] module is the intended entry point for most callers;
//! [`Engine`] itself is exposed for callers that want to build their own
//! request shaping on top of [`request::RequestSpec`].

pub mod client;
pub mod engine;
pub mod error;
pub mod poller;
pub mod ready;
pub mod request;
pub mod response;
mod sys;
pub mod token;

pub use client::{Client, ClientConfig};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind};
pub use request::{Method, ProxySpec, RequestSpec};
pub use response::Response;
