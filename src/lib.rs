mod utils;
mod amf;
mod protocol;
mod handshake;
mod chunk;
mod client;
mod flv;
mod audio;
mod encoder;
mod publisher;

// Re-export commonly used types at crate root
pub use utils::*;
pub use amf::*;
pub use protocol::*;
pub use chunk::*;
pub use handshake::*;

// Client exports
pub use client::{
    AckTracker, ClientConfig, ClientConfigBuilder, ClientState, Endpoint, PayloadKind, RtmpClient,
};

// Muxer exports
pub use flv::*;

// Capture/mixer exports
pub use audio::*;

// Encoder exports
pub use encoder::*;

// Publisher exports
pub use publisher::*;
