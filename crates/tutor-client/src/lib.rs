//! # tutor-client
//!
//! Client side of the tutor stream: open a request to the proxy, decode the
//! frames as bytes arrive, and fold them into session state.
//!
//! ```ignore
//! use tutor_client::{ClientConfig, ProxyClient, Session};
//!
//! let mut session = Session::new(ProxyClient::new(ClientConfig::from_env()));
//! session.submit("What is spear phishing?")?;
//! let phase = session.join().await;
//! println!("{:?}", session.transcript().turns());
//! ```

pub mod client;
pub mod consumer;
pub mod error;
pub mod session;
pub mod transcript;

pub use client::{ClientConfig, DEFAULT_PROXY_URL, ProxyClient};
pub use consumer::{Completion, Flow, SessionState, StreamConsumer, consume};
pub use error::Error;
pub use session::{ABORTED_TEXT, AskOptions, RequestPhase, Session};
pub use transcript::{Slot, Transcript};
