//! Status server: listener setup and per-connection handling.
//!
//! One connection is serviced at a time on the single control thread.
//! The accept poll is non-blocking so the measurement loop is never held
//! up by an idle listener; the post-accept read carries an explicit
//! timeout so a silent client cannot stall the process.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::meter::MeasurementState;
use crate::protocol::{Command, Response};

/// Interval between bind attempts while the network is unavailable
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Capacity of the request-line buffer; bytes beyond it are discarded
const MAX_REQUEST_LINE: usize = 512;

/// Bound listening endpoint, established once at startup
pub struct Session {
    listener: TcpListener,
}

impl Session {
    /// Resolve the configured listen address and bind, retrying at a fixed
    /// interval until the network lets us. Returns only on success.
    pub fn establish(config: &Config) -> io::Result<Self> {
        let addr = resolve_listen_addr(&config.listen)?;

        let listener = loop {
            match bind_listener(addr) {
                Ok(listener) => break listener,
                Err(e) => {
                    warn!(address = %addr, error = %e, "Bind failed, retrying");
                    thread::sleep(BIND_RETRY_INTERVAL);
                }
            }
        };

        info!(url = %format!("http://{}/", listener.local_addr()?), "Server started");

        Ok(Self { listener })
    }

    /// Bind a specific address once, without retry. Used by tests.
    #[cfg(test)]
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            listener: bind_listener(addr)?,
        })
    }

    /// Bound address, for tests against an ephemeral port
    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// Poll for one pending connection. Returns immediately with `None`
    /// when no client is waiting.
    fn poll_accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, peer)) => Ok(Some((stream, peer))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolve the configured listen string to a socket address
fn resolve_listen_addr(listen: &str) -> io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("listen address '{}' resolved to nothing", listen),
        )
    })
}

/// Build the listening socket: reuse_address for quick restarts,
/// non-blocking so accept becomes a poll
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(16)?;

    Ok(socket.into())
}

/// Serves one request per connection from the current measurement state
pub struct Responder {
    session: Session,
    request_timeout: Duration,
}

impl Responder {
    pub fn new(session: Session, request_timeout: Duration) -> Self {
        Self {
            session,
            request_timeout,
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    /// Poll for a pending connection and, if one is waiting, service it to
    /// completion: read the request line, dispatch, write one response,
    /// close. Returns whether a connection was serviced.
    ///
    /// Connection-level failures are absorbed here: a client that errors
    /// mid-request costs us the connection, never the process.
    pub fn poll(&self, state: &MeasurementState) -> bool {
        let (stream, peer) = match self.session.poll_accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                return false;
            }
        };

        debug!(peer = %peer, "New client");
        if let Err(e) = self.handle_connection(stream, state) {
            warn!(peer = %peer, error = %e, "Connection error");
        }
        true
    }

    /// The per-connection state machine: read, dispatch, respond, close
    fn handle_connection(&self, mut stream: TcpStream, state: &MeasurementState) -> io::Result<()> {
        // Some platforms hand out accepted streams in non-blocking mode;
        // the request read must block, bounded by the timeout
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.request_timeout))?;

        let request = read_request_line(&mut stream)?;
        let command = Command::dispatch(&request);
        let body = command.render(state);
        let response = Response::assemble(&body);

        debug!(
            request = %request,
            command = ?command,
            response_bytes = response.len(),
            "Request served"
        );

        stream.write_all(&response)?;
        stream.flush()?;
        Ok(())
    }
}

/// Read the first line of the request, up to the carriage return, into a
/// fixed-capacity buffer. Bytes beyond the capacity are read and
/// discarded so a flooding client cannot grow memory; the truncated
/// prefix is what gets dispatched.
fn read_request_line(stream: &mut TcpStream) -> io::Result<String> {
    let mut line = Vec::with_capacity(MAX_REQUEST_LINE);
    let mut byte = [0u8; 1];

    loop {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\r' || byte[0] == b'\n' {
                    break;
                }
                if line.len() < MAX_REQUEST_LINE {
                    line.push(byte[0]);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Timed out waiting on a silent client: dispatch what we have
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::FrequencyMeter;
    use std::net::TcpStream as StdTcpStream;

    fn responder() -> Responder {
        let session = Session::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        Responder::new(session, Duration::from_millis(200))
    }

    fn state_from(samples: &[f64]) -> MeasurementState {
        let mut meter = FrequencyMeter::new();
        meter.reset();
        for &s in samples {
            meter.classify(s);
        }
        meter.finalize();
        meter.state().clone()
    }

    fn request(addr: SocketAddr, line: &str, responder: &Responder, state: &MeasurementState) -> String {
        let mut client = StdTcpStream::connect(addr).unwrap();
        client.write_all(line.as_bytes()).unwrap();

        // Service the pending connection on this side
        while !responder.poll(state) {}

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_poll_without_client_returns_immediately() {
        let responder = responder();
        let state = MeasurementState::default();
        assert!(!responder.poll(&state));
    }

    #[test]
    fn test_frequency_request_round_trip() {
        let responder = responder();
        let state = state_from(&[50.0, 50.0]);

        let response = request(
            responder.local_addr(),
            "GET /frequency HTTP/1.1\r\n",
            &responder,
            &state,
        );

        assert!(response.starts_with("HTTP/1.1 200 OK\n"));
        assert!(response.contains("Content-Length: 26\n"));
        assert!(response.ends_with("\n\nFrequency(Hz):50.000000:2:\n"));
    }

    #[test]
    fn test_alldata_request_round_trip() {
        let responder = responder();
        let state = state_from(&[50.0, 60.0]);

        let response = request(
            responder.local_addr(),
            "GET /alldata HTTP/1.1\r\n",
            &responder,
            &state,
        );

        assert!(response.ends_with("\n\nFrequency(Hz):50.000000:1:\nAnomalies:60:1:\n"));
    }

    #[test]
    fn test_unrecognized_request_is_invalid() {
        let responder = responder();
        let state = MeasurementState::default();

        let response = request(
            responder.local_addr(),
            "GET /nonsense HTTP/1.1\r\n",
            &responder,
            &state,
        );

        assert!(response.contains("Content-Length: 16\n"));
        assert!(response.ends_with("\n\nInvalid Request.\n"));
    }

    #[test]
    fn test_oversized_request_line_is_truncated() {
        let responder = responder();
        let state = MeasurementState::default();

        // Keyword sits beyond the line-buffer capacity: the truncated
        // prefix contains no keyword, so the request is invalid
        let mut line = "X".repeat(MAX_REQUEST_LINE);
        line.push_str("frequency\r\n");
        let response = request(responder.local_addr(), &line, &responder, &state);

        assert!(response.ends_with("Invalid Request.\n"));
    }

    #[test]
    fn test_silent_client_times_out_without_stalling() {
        let responder = responder();
        let state = MeasurementState::default();

        // Connect but send nothing: the read must give up after the
        // configured timeout and the empty request dispatches as invalid
        let mut client = StdTcpStream::connect(responder.local_addr()).unwrap();
        while !responder.poll(&state) {}

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.ends_with("Invalid Request.\n"));
    }
}
