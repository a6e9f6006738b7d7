//! # tutor-proxy
//!
//! A thin HTTP service in front of the tutor backend. Each `POST
//! /api/stream` makes exactly one backend call and republishes its outcome as
//! `ready`, then one `chunk` or `error`, then `done`.

pub mod config;
pub mod error;
pub mod forward;
pub mod server;

pub use config::ProxyConfig;
pub use error::Error;
pub use forward::Forwarder;
pub use server::{router, serve};
