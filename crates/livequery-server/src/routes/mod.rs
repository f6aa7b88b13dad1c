//! HTTP route handlers.

pub mod changes;
pub mod health;
pub mod live;
