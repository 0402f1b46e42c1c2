//! GroupMe push client.
//!
//! Receives real-time GroupMe events over the Faye (Bayeux) protocol on a
//! single websocket connection.
//!
//! # Features
//! - Identity lookup and JSONP handshake over HTTP
//! - Personal and group channel subscriptions
//! - Perpetual `/meta/connect` loop and ping responses
//! - Per-category handlers run off the dispatch loop
//! - Optional filtering of events sent by the connected user
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), groupme_push::Error> {
//! use groupme_push::{Callbacks, PushClient, PushConfig};
//!
//! let callbacks = Callbacks::new()
//!     .on_message(|subject| println!("{}", subject["text"]))
//!     .on_error(|e| eprintln!("push connection lost: {e}"));
//!
//! let mut client = PushClient::new(PushConfig::from_env()?.disregard_self(true), callbacks);
//! client.start().await?;
//! client.subscribe_to_group("12345678").await;
//! client.closed().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod dispatch;
mod handshake;
mod protocol;
mod router;
mod sequence;
mod types;

pub use client::PushClient;
pub use router::{Callbacks, ErrorHandler, Handler};
pub use types::{ACCESS_TOKEN_ENV, Category, Error, PushConfig};
