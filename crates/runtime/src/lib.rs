mod client;
mod protocol;
mod server;
mod store;

pub use client::{DaemonClient, UpdateOutcome};
pub use protocol::{ClientRequest, InitPayload, LogLevel, ServerEvent, ViewFlags};
pub use server::run_daemon;
pub use store::{GraphStore, Neighborhood, ViewPrefs};
