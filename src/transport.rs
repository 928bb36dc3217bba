//! Transport adapter contract (component C3) and its concrete realization.
//!
//! The core only depends on the four operations below; any compliant
//! WebSocket client satisfies it. [`WsTransport`] is the concrete adapter
//! used in production, built on the blocking `tungstenite` client so it
//! composes naturally with the OS-thread concurrency model the rest of this
//! crate uses (no async runtime needed for a worker that just blocks on
//! `read`/`write`).
//!
//! Receiver and Sender share one transport behind a single mutex (see
//! `ClientFacade`), so `read_text` must never hold that mutex across an
//! indefinite block - a socket idle for longer than one frame interval
//! would starve the Sender out of the lock forever. `WsTransport` gives the
//! underlying socket a short read timeout and surfaces "nothing yet" as its
//! own outcome distinct from "connection closed", so the lock is reacquired
//! and released every `READ_POLL_TIMEOUT` regardless of traffic.

use crate::error::TransportError;
use crate::logging::Logger;
use native_tls::TlsConnector;
use slog::{debug, warn};
use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{client, Message, WebSocket};

/// How long a single `read_text` call may block the underlying socket read
/// before giving up and returning `Pending`. Short enough that the Sender
/// never waits long for the shared transport lock.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Outcome of a single `read_text` call.
pub enum ReadOutcome {
    /// A complete text frame.
    Frame(String),
    /// No complete text frame this call (poll timeout, or a non-text frame
    /// was consumed and skipped) - the caller should retry.
    Pending,
    /// The connection is closed or failed; no further frames will arrive.
    Closed,
}

/// Synchronous text-frame transport. `read_text` must never block longer
/// than a short, bounded interval, so a worker holding a lock on the
/// transport while idle cannot starve a sibling worker that needs to write.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn send_text(&mut self, msg: &str);
    fn read_text(&mut self) -> ReadOutcome;
    fn close(&mut self);
}

/// Production transport: a WebSocket client over TLS, with the underlying
/// socket put into a short-read-timeout (not non-blocking) mode so
/// `read_text` always returns promptly.
pub struct WsTransport {
    url: String,
    socket: Option<WebSocket<MaybeTlsStream<TcpStream>>>,
    closed: AtomicBool,
    log: Logger,
}

impl WsTransport {
    pub fn new(url: String, log: Logger) -> WsTransport {
        WsTransport { url, socket: None, closed: AtomicBool::new(false), log }
    }
}

/// Splits `wss://host[:port]/path` (or `ws://`) into (is_tls, host, port).
/// `ClientFacade`/`Config` only ever produce `wss://` URLs, but `ws://` is
/// accepted too for tests against a plaintext echo server.
fn parse_ws_url(url: &str) -> Result<(bool, String, u16), TransportError> {
    let (is_tls, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        (false, rest)
    } else {
        return Err(TransportError::Handshake(format!("unsupported url scheme: {}", url)));
    };

    let host_port = rest.split('/').next().unwrap_or(rest);
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| TransportError::Handshake(format!("invalid port in url: {}", url)))?;
            (host.to_owned(), port)
        }
        None => (host_port.to_owned(), if is_tls { 443 } else { 80 }),
    };

    Ok((is_tls, host, port))
}

impl Transport for WsTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let (is_tls, host, port) = parse_ws_url(&self.url)?;

        let tcp = TcpStream::connect((host.as_str(), port))?;
        tcp.set_read_timeout(Some(READ_POLL_TIMEOUT))?;

        let stream = if is_tls {
            let connector =
                TlsConnector::new().map_err(|e| TransportError::Handshake(e.to_string()))?;
            let tls = connector
                .connect(&host, tcp)
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            MaybeTlsStream::NativeTls(tls)
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let (socket, _response) =
            client(self.url.as_str(), stream).map_err(|e| TransportError::Handshake(e.to_string()))?;
        self.socket = Some(socket);
        self.closed.store(false, Ordering::Release);
        Ok(())
    }

    fn send_text(&mut self, msg: &str) {
        if let Some(socket) = self.socket.as_mut() {
            if let Err(e) = socket.send(Message::Text(msg.to_owned())) {
                warn!(self.log, "transport send failed, dropping frame"; "error" => %e);
            }
        }
    }

    fn read_text(&mut self) -> ReadOutcome {
        let socket = match self.socket.as_mut() {
            Some(s) => s,
            None => return ReadOutcome::Closed,
        };

        match socket.read() {
            Ok(Message::Text(text)) => ReadOutcome::Frame(text),
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                ReadOutcome::Pending
            }
            Ok(Message::Close(_)) => {
                debug!(self.log, "received close frame");
                ReadOutcome::Closed
            }
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                ReadOutcome::Pending
            }
            Err(e) => {
                debug!(self.log, "transport read ended"; "error" => %e);
                ReadOutcome::Closed
            }
        }
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(socket) = self.socket.as_mut() {
            let _ = socket.close(None);
        }
    }
}

/// In-memory transport for tests: reads come from a preloaded queue of
/// frames, writes are recorded for assertions.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::{ReadOutcome, Transport};
    use crate::error::TransportError;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone)]
    pub struct MockTransport {
        inbound: Arc<Mutex<VecDeque<String>>>,
        pub sent: Arc<Mutex<Vec<String>>>,
        connected: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport {
                inbound: Arc::new(Mutex::new(VecDeque::new())),
                sent: Arc::new(Mutex::new(Vec::new())),
                connected: Arc::new(Mutex::new(true)),
            }
        }

        /// Queues a frame to be returned by a future `read_text` call.
        pub fn push_inbound(&self, frame: impl Into<String>) {
            self.inbound.lock().unwrap().push_back(frame.into());
        }

        pub fn sent_frames(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn send_text(&mut self, msg: &str) {
            self.sent.lock().unwrap().push(msg.to_owned());
        }

        fn read_text(&mut self) -> ReadOutcome {
            // One attempt per call, like the real transport's bounded socket
            // read - never loop here, or the shared transport lock a caller
            // holds across this call would be held indefinitely too.
            if let Some(frame) = self.inbound.lock().unwrap().pop_front() {
                return if frame.is_empty() { ReadOutcome::Closed } else { ReadOutcome::Frame(frame) };
            }
            if !*self.connected.lock().unwrap() {
                return ReadOutcome::Closed;
            }
            std::thread::sleep(Duration::from_millis(5));
            ReadOutcome::Pending
        }

        fn close(&mut self) {
            *self.connected.lock().unwrap() = false;
            self.inbound.lock().unwrap().push_back(String::new());
        }
    }
}
