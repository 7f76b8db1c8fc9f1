//! Positioning source connection.
//!
//! The collector talks to the source through [`FixSource`]. [`GpsdSource`]
//! implements it over gpsd's JSON protocol: connect over TCP, enable
//! watching, then read newline-delimited reports.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Command enabling JSON report streaming on a gpsd connection.
const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// Default gpsd address.
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

/// How long a read waits before reporting "no data yet".
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised by a positioning source connection.
#[derive(Debug)]
pub enum SourceError {
    /// Connection could not be established
    Connect(std::io::Error),

    /// Reading from an established connection failed
    Io(std::io::Error),

    /// The source closed the connection
    Closed,

    /// A read was attempted without a connection
    NotConnected,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Connect(e) => write!(f, "Failed to connect to positioning source: {}", e),
            SourceError::Io(e) => write!(f, "Positioning source read failed: {}", e),
            SourceError::Closed => write!(f, "Positioning source closed the connection"),
            SourceError::NotConnected => write!(f, "Positioning source is not connected"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Connect(e) | SourceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A stream of raw position messages.
pub trait FixSource {
    /// Open the connection and start watching for fixes.
    fn connect(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Read the next message.
    ///
    /// `Ok(None)` means no message is ready yet and is not an error.
    fn next_message(&mut self) -> impl Future<Output = Result<Option<String>, SourceError>> + Send;

    /// Drop the connection. Safe to call when not connected.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// gpsd client speaking the JSON watch protocol over TCP.
#[derive(Debug)]
pub struct GpsdSource {
    addr: String,
    poll_timeout: Duration,
    lines: Option<Lines<BufReader<TcpStream>>>,
}

impl GpsdSource {
    /// Create a disconnected source for `addr`.
    pub fn new(addr: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            poll_timeout,
            lines: None,
        }
    }

    /// Check whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.lines.is_some()
    }
}

impl FixSource for GpsdSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(SourceError::Connect)?;
        stream
            .write_all(WATCH_COMMAND)
            .await
            .map_err(SourceError::Connect)?;

        debug!(addr = %self.addr, "Watching gpsd");
        self.lines = Some(BufReader::new(stream).lines());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<String>, SourceError> {
        let lines = self.lines.as_mut().ok_or(SourceError::NotConnected)?;

        match timeout(self.poll_timeout, lines.next_line()).await {
            Err(_) => Ok(None),
            Ok(Ok(Some(line))) if line.trim().is_empty() => Ok(None),
            Ok(Ok(Some(line))) => Ok(Some(line)),
            Ok(Ok(None)) => Err(SourceError::Closed),
            Ok(Err(e)) => Err(SourceError::Io(e)),
        }
    }

    async fn close(&mut self) {
        if self.lines.take().is_some() {
            debug!(addr = %self.addr, "Closed gpsd connection");
        }
    }
}
