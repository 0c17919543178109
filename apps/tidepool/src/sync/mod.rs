pub mod messages;
pub mod scheduler;
pub mod session;

pub use messages::MessageLog;
pub use scheduler::{Plan, UpdateScheduler};
pub use session::{SessionFlags, SessionHost, SyncSession, ViewState};
