//! Plain-text rendering of measurement state.
//!
//! Two colon-delimited record formats:
//! - frequency: `Frequency(Hz):<mean>:<accepted sample count>:` or `Empty`
//! - anomalies: `Anomalies:<freq>:<count>:...` (ascending frequency) or `Empty`
//!
//! All renderers are pure functions over the current batch state.

use crate::meter::MeasurementState;
use std::fmt::Write;

/// Marker emitted when a section has nothing to report
pub const EMPTY_MARKER: &str = "Empty";

/// Render the mean-frequency record for the current batch
pub fn render_frequency(state: &MeasurementState) -> String {
    match (state.sample_counter, state.freq) {
        (n, Some(freq)) if n >= 1 => {
            format!("Frequency(Hz):{:.6}:{}:", freq, n)
        }
        _ => EMPTY_MARKER.to_string(),
    }
}

/// Render the anomaly histogram, one `<freq>:<count>:` pair per bucket in
/// ascending frequency order
pub fn render_anomalies(state: &MeasurementState) -> String {
    if state.harmonics.is_empty() {
        return EMPTY_MARKER.to_string();
    }

    let mut out = String::from("Anomalies:");
    for (freq, count) in &state.harmonics {
        // Writing to a String cannot fail
        let _ = write!(out, "{}:{}:", freq, count);
    }
    out
}

/// Render both sections, newline-separated
pub fn render_all(state: &MeasurementState) -> String {
    format!("{}\n{}", render_frequency(state), render_anomalies(state))
}
