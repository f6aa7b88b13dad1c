//! livequery client - shared live query subscriptions.
//!
//! This crate keeps UI and query layers up to date with a livequery server:
//!
//! - [`Multiplexer`] shares one push connection per topic across any number
//!   of local subscribers and fans events out to them
//! - [`debounce`] coalesces bursts of events per subscriber
//! - [`SnapshotStream`] turns a subscription into a cancellable pull-based stream
//!
//! # Quick Start
//!
//! ```ignore
//! use livequery_client::{ClientConfig, Multiplexer, SubscribeOptions};
//! use livequery_client::proto::Topic;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mux = Multiplexer::from_config(&ClientConfig::localhost());
//!
//!     let topic = Topic::collection("posts").include("author");
//!     let options = SubscribeOptions::new()
//!         .with_debounce(Duration::from_millis(200))
//!         .on_error(|e| eprintln!("live query failed: {e}"));
//!
//!     let subscription = mux.subscribe(&topic, options, |event| {
//!         println!("posts changed at sequence {}", event.sequence);
//!     })?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     subscription.unsubscribe();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod multiplexer;
pub mod stream;
pub mod transport;

pub use config::ClientConfig;
pub use debounce::Debouncer;
pub use error::Error;
pub use multiplexer::{Callback, ErrorCallback, Multiplexer, SubscribeOptions, Subscription};
pub use stream::SnapshotStream;
pub use transport::{EventStream, SseTransport, Transport};

/// Re-export tokio-util's cancellation token used by subscriptions and streams.
pub use tokio_util::sync::CancellationToken;

/// Re-export protocol types.
pub use livequery_proto as proto;
