#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected
    Disconnected,

    /// TCP/TLS/RTMP handshake or command dialog in flight
    Connecting,

    /// Connection established, not yet publishing
    Connected,

    /// Publish dialog completed, media flowing
    Publishing,
}

impl ClientState {
    /// Check if connected
    pub fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected | ClientState::Publishing)
    }

    /// Check if publishing
    pub fn is_publishing(&self) -> bool {
        *self == ClientState::Publishing
    }
}
