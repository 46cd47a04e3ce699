//! Frequency aggregation over a batch of pulse samples.
//!
//! Each instantaneous sample is either an in-band reading (within ±0.5 Hz
//! of the 50 Hz nominal, the expected grid tolerance) or an anomaly.
//! In-band samples contribute to a running mean; anomalies are histogrammed
//! by truncated integer frequency, giving a coarse anomaly spectrum with
//! O(1) memory per distinct integer frequency.
//!
//! State describes exactly one batch: every `measure` call resets it before
//! accumulating, and nothing is retained across batches.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::sampler::{PulseInput, Sampler};

/// Lower edge of the accepted band (inclusive)
pub const BAND_LOW_HZ: f64 = 49.50;

/// Upper edge of the accepted band (inclusive)
pub const BAND_HIGH_HZ: f64 = 50.50;

/// Aggregated results of the current measurement batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementState {
    /// Count of accepted in-band samples
    pub sample_counter: usize,
    /// Mean frequency of the in-band samples; `None` until a batch with at
    /// least one accepted sample has been finalized
    pub freq: Option<f64>,
    /// Occurrence count per truncated integer frequency of out-of-band
    /// samples, in ascending key order
    pub harmonics: BTreeMap<i32, u32>,
}

/// Frequency aggregator driving the sample/classify/finalize cycle
#[derive(Debug, Default)]
pub struct FrequencyMeter {
    state: MeasurementState,
    freq_sum: f64,
}

impl FrequencyMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current batch results
    pub fn state(&self) -> &MeasurementState {
        &self.state
    }

    /// Clear all batch state before accumulating a new batch
    pub fn reset(&mut self) {
        self.state.sample_counter = 0;
        self.state.freq = None;
        self.state.harmonics.clear();
        self.freq_sum = 0.0;
    }

    /// Classify one instantaneous frequency: accumulate it if it lies in
    /// the closed accepted band, otherwise bump its anomaly bucket.
    pub fn classify(&mut self, inst_frequency: f64) {
        if (BAND_LOW_HZ..=BAND_HIGH_HZ).contains(&inst_frequency) {
            self.freq_sum += inst_frequency;
            self.state.sample_counter += 1;
        } else {
            let bucket = self.state.harmonics.entry(truncate_hz(inst_frequency)).or_insert(0);
            *bucket += 1;
        }
    }

    /// Compute the batch mean. With no accepted samples the mean stays
    /// `None` rather than dividing by zero.
    pub fn finalize(&mut self) {
        if self.state.sample_counter > 0 {
            self.state.freq = Some(self.freq_sum / self.state.sample_counter as f64);
        } else {
            self.state.freq = None;
        }
    }

    /// Run one full measurement batch: reset, take `samples` pulse
    /// readings, classify each, finalize.
    ///
    /// Degenerate samples (pulse timeouts) and hardware read failures are
    /// absorbed here: they are skipped without touching the band counter
    /// or the histogram. The cycle always runs to completion.
    pub fn measure<P: PulseInput>(&mut self, sampler: &mut Sampler<P>, samples: usize) {
        self.reset();

        let mut dropped = 0usize;
        for _ in 0..samples {
            match sampler.sample() {
                Ok(Some(inst)) => self.classify(inst),
                Ok(None) => dropped += 1,
                Err(e) => {
                    warn!(error = %e, "Pulse read failed, dropping sample");
                    dropped += 1;
                }
            }
        }

        self.finalize();

        debug!(
            accepted = self.state.sample_counter,
            anomalies = self.state.harmonics.values().map(|&c| c as u64).sum::<u64>(),
            dropped,
            mean_hz = ?self.state.freq,
            "Measurement batch complete"
        );
    }
}

/// The single truncation site mapping an out-of-band frequency to its
/// histogram key (round toward zero).
fn truncate_hz(frequency: f64) -> i32 {
    frequency.trunc() as i32
}
