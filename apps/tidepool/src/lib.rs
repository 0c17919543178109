//! Client-side engine for remote-rendered panels.
//!
//! A backend process owns application state and streams UI deltas; a
//! [`sync::SyncSession`] applies them to a local element tree, keeps named
//! state cells and on-screen refs in step, batches user events, and decides
//! when to ask the backend for the next render.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod protocol;
pub mod refs;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod transport;
pub mod tree;

pub use config::SessionConfig;
pub use error::{ConfigError, SessionError};
pub use sync::{SessionHost, SyncSession, ViewState};
