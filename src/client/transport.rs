use crate::client::config::Endpoint;
use crate::{Error, Result};
use native_tls::{HandshakeError, Protocol, TlsConnector, TlsStream};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Read poll bound for an owned plain-TCP read half
const TCP_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Read poll bound for a TLS read half. Short because the session lock is
/// held across the read and the writer must not starve.
const TLS_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Established transport, before splitting into halves
pub enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// What one bounded read produced
pub enum ReadOutcome {
    Data(usize),
    /// The poll timeout elapsed with nothing to read
    Idle,
    Eof,
}

impl Transport {
    /// Open the TCP connection (and TLS session for rtmps) to the ingest.
    /// SNI is set from the hostname; TLS 1.2 is the protocol floor.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Transport> {
        let addrs: Vec<_> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| Error::Io(e))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::io(format!("No addresses for {}", endpoint.host)));
        }

        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(Error::Io(last_err.unwrap_or_else(|| {
                    std::io::Error::new(ErrorKind::NotConnected, "connect failed")
                })));
            }
        };

        stream.set_nodelay(true)?;

        if !endpoint.secure {
            return Ok(Transport::Tcp(stream));
        }

        let connector = TlsConnector::builder()
            .min_protocol_version(Some(Protocol::Tlsv12))
            .build()
            .map_err(|e| Error::tls(format!("TLS context: {}", e)))?;

        // CDN front doors route on SNI, which native-tls derives from the
        // domain argument
        let tls = connector
            .connect(&endpoint.host, stream)
            .map_err(|e| match e {
                HandshakeError::Failure(e) => Error::tls(format!("TLS handshake: {}", e)),
                HandshakeError::WouldBlock(_) => {
                    Error::tls("TLS handshake interrupted".to_string())
                }
            })?;

        Ok(Transport::Tls(Box::new(tls)))
    }

    /// Bound every read on the underlying socket
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket().set_read_timeout(Some(timeout))?;
        Ok(())
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Transport::Tcp(s) => s,
            Transport::Tls(s) => s.get_ref(),
        }
    }

    /// Clone of the raw socket, used to unblock reads at teardown
    pub fn shutdown_handle(&self) -> Result<TcpStream> {
        Ok(self.socket().try_clone()?)
    }

    /// Split into independently owned read and write paths.
    ///
    /// Plain TCP reads run on an owned socket clone and never contend with
    /// writes. A TLS session cannot be cloned, so both halves share it
    /// under a mutex and the read path polls with a short socket timeout.
    pub fn split(self) -> Result<(ReadHalf, WriteHalf)> {
        match self {
            Transport::Tcp(stream) => {
                stream.set_read_timeout(Some(TCP_POLL_TIMEOUT))?;
                let reader = stream.try_clone()?;
                Ok((ReadHalf::Tcp(reader), WriteHalf::Tcp(stream)))
            }
            Transport::Tls(stream) => {
                stream.get_ref().set_read_timeout(Some(TLS_POLL_TIMEOUT))?;
                let shared = Arc::new(Mutex::new(*stream));
                Ok((ReadHalf::Tls(shared.clone()), WriteHalf::Tls(shared)))
            }
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Tcp(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// Read side of a live connection, owned by the reader
pub enum ReadHalf {
    Tcp(TcpStream),
    Tls(Arc<Mutex<TlsStream<TcpStream>>>),
}

impl ReadHalf {
    /// One bounded read. Timeouts surface as `Idle`, a clean close as
    /// `Eof`.
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let result = match self {
            ReadHalf::Tcp(stream) => stream.read(buf),
            ReadHalf::Tls(shared) => {
                let mut stream = shared.lock().expect("transport lock poisoned");
                stream.read(buf)
            }
        };

        match result {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(ReadOutcome::Idle)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::Idle),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// True when reads should yield between polls to release the shared
    /// session lock
    pub fn wants_yield(&self) -> bool {
        matches!(self, ReadHalf::Tls(_))
    }
}

/// Write side of a live connection, shared behind the client's write mutex
pub enum WriteHalf {
    Tcp(TcpStream),
    Tls(Arc<Mutex<TlsStream<TcpStream>>>),
}

impl WriteHalf {
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            WriteHalf::Tcp(stream) => {
                stream.write_all(bytes)?;
                stream.flush()?;
            }
            WriteHalf::Tls(shared) => {
                let mut stream = shared.lock().expect("transport lock poisoned");
                stream.write_all(bytes)?;
                stream.flush()?;
            }
        }
        Ok(())
    }
}

/// Force-close a socket, unblocking any reader parked on it
pub fn shutdown_socket(socket: &TcpStream) {
    let _ = socket.shutdown(Shutdown::Both);
}
