mod ack;
mod client;
mod config;
mod state;
mod transport;

pub use ack::AckTracker;
pub use client::{PayloadKind, RtmpClient};
pub use config::{ClientConfig, ClientConfigBuilder, Endpoint};
pub use state::ClientState;
