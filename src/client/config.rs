use crate::protocol::{DEFAULT_WINDOW_SIZE, MAX_CHUNK_SIZE};
use crate::{Error, Result};
use std::time::Duration;
use url::Url;

/// Default ports for the two URL schemes
pub const DEFAULT_RTMP_PORT: u16 = 1935;
pub const DEFAULT_RTMPS_PORT: u16 = 443;

/// Where to publish: parsed from the ingest URL plus the stream key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Application name, e.g. "live2"
    pub app: String,
    pub stream_key: String,
    /// TLS-wrapped transport (rtmps)
    pub secure: bool,
}

impl Endpoint {
    /// Parse an `rtmp://` or `rtmps://` ingest URL and a stream key
    pub fn parse(url: &str, stream_key: &str) -> Result<Self> {
        if stream_key.trim().is_empty() {
            return Err(Error::invalid_input("Stream key must not be empty"));
        }

        let parsed =
            Url::parse(url).map_err(|e| Error::invalid_input(format!("Invalid URL: {}", e)))?;

        let secure = match parsed.scheme() {
            "rtmp" => false,
            "rtmps" => true,
            scheme => {
                return Err(Error::invalid_input(format!(
                    "Unsupported scheme: {}",
                    scheme
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::invalid_input("Missing host in URL"))?
            .to_string();

        let port = parsed.port().unwrap_or(if secure {
            DEFAULT_RTMPS_PORT
        } else {
            DEFAULT_RTMP_PORT
        });

        let app = parsed
            .path()
            .trim_matches('/')
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_input("Missing application name in URL"))?
            .to_string();

        Ok(Endpoint {
            host,
            port,
            app,
            stream_key: stream_key.to_string(),
            secure,
        })
    }

    /// The tcUrl carried in the connect command object
    pub fn tc_url(&self) -> String {
        let scheme = if self.secure { "rtmps" } else { "rtmp" };
        format!("{}://{}:{}/{}", scheme, self.host, self.port, self.app)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP connect (plus TLS handshake) budget
    pub connect_timeout: Duration,

    /// RTMP handshake budget
    pub handshake_timeout: Duration,

    /// Whole command dialog budget, connect through publish
    pub dialog_timeout: Duration,

    /// Outgoing chunk size negotiated right after the handshake
    pub chunk_size: u32,

    /// Window acknowledgement size advertised to the peer
    pub window_ack_size: u32,

    /// Keepalive check cadence while publishing
    pub keepalive_interval: Duration,

    /// Inbound silence that triggers a ping
    pub idle_ping_threshold: Duration,

    /// Client identifier sent as flashVer
    pub flash_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            dialog_timeout: Duration::from_secs(10),
            chunk_size: 4096,
            window_ack_size: DEFAULT_WINDOW_SIZE,
            keepalive_interval: Duration::from_secs(10),
            idle_ping_threshold: Duration::from_secs(8),
            flash_version: "FMLE/3.0 (compatible; livecast)".to_string(),
        }
    }
}

impl ClientConfig {
    /// Create config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 128 {
            return Err(Error::invalid_input("Chunk size must be at least 128"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::invalid_input("Chunk size must not exceed 65536"));
        }
        if self.window_ack_size == 0 {
            return Err(Error::invalid_input("Window size must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create new builder
    pub fn new() -> Self {
        ClientConfigBuilder {
            config: ClientConfig::default(),
        }
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set dialog timeout
    pub fn dialog_timeout(mut self, timeout: Duration) -> Self {
        self.config.dialog_timeout = timeout;
        self
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set advertised window acknowledgement size
    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.config.window_ack_size = size;
        self
    }

    /// Set keepalive cadence
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Build configuration
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        ClientConfigBuilder::new()
    }
}
