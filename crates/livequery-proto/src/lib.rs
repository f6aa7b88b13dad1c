//! livequery protocol types.
//!
//! This crate defines the types shared by the livequery server and client:
//!
//! - [`change`] - Change records appended by the CRUD engine after each commit
//! - [`topic`] - Topic identity derived from a query shape
//! - [`canonical`] - Bracketed query-string canonicalization for topic keys
//! - [`event`] - Events pushed over a topic stream
//! - [`error`] - Protocol error types
//!
//! Change records derive `rkyv` traits so the change log can persist them
//! without an intermediate representation; everything that crosses HTTP uses
//! `serde`.

pub mod canonical;
pub mod change;
pub mod error;
pub mod event;
pub mod topic;

pub use change::{ChangeOperation, ChangeRecord, NewChange, ResourceType};
pub use error::Error;
pub use event::{EventKind, StreamEvent};
pub use topic::{DeliveryMode, NestedWith, Topic, TopicParams, WithEntry, WithTree};

/// Path prefix of the live stream endpoint.
pub const LIVE_PATH: &str = "/live";
