//! Request dispatch and response assembly for the status protocol.
//!
//! A request is a single line of text; the only thing that matters is
//! which of three keywords it contains:
//! - `frequency`: the mean-frequency record
//! - `anomalies`: the anomaly histogram
//! - `alldata`: both, newline-separated
//!
//! The response is HTTP-shaped: a fixed `200 OK` preamble, a computed
//! `Content-Length`, a blank line, the body, and a trailing newline.
//! Exactly one response per connection.

use bytes::BytesMut;

use crate::meter::MeasurementState;
use crate::report;

/// Body returned for a request matching no keyword
pub const INVALID_REQUEST_BODY: &str = "Invalid Request.";

/// Parsed request command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Mean frequency of the current batch
    Frequency,
    /// Anomaly histogram of the current batch
    Anomalies,
    /// Both sections
    AllData,
    /// No recognized keyword
    Invalid,
}

impl Command {
    /// Dispatch on keyword containment, first match wins:
    /// "frequency", then "anomalies", then "alldata".
    pub fn dispatch(request_line: &str) -> Self {
        if request_line.contains("frequency") {
            Command::Frequency
        } else if request_line.contains("anomalies") {
            Command::Anomalies
        } else if request_line.contains("alldata") {
            Command::AllData
        } else {
            Command::Invalid
        }
    }

    /// Render the response body for this command from the current state
    pub fn render(self, state: &MeasurementState) -> String {
        match self {
            Command::Frequency => report::render_frequency(state),
            Command::Anomalies => report::render_anomalies(state),
            Command::AllData => report::render_all(state),
            Command::Invalid => INVALID_REQUEST_BODY.to_string(),
        }
    }
}

/// Response assembler
pub struct Response;

impl Response {
    /// Assemble the full wire response for a body.
    ///
    /// `Content-Length` counts the body bytes only, not the trailing
    /// newline.
    pub fn assemble(body: &str) -> BytesMut {
        let mut out = BytesMut::with_capacity(128 + body.len());
        out.extend_from_slice(b"HTTP/1.1 200 OK\nAccept-Ranges: bytes\nContent-Length: ");
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.extend_from_slice(b"\nConnection: close\nContent-Type: text/plain\n\n");
        out.extend_from_slice(body.as_bytes());
        out.extend_from_slice(b"\n");
        out
    }
}
