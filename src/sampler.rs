//! Pulse sampling over a digital input line.
//!
//! The AC line, squared off by external conditioning hardware, drives a
//! digital input. One mains cycle is one high phase plus one low phase;
//! timing both and summing them gives the period, and the period gives
//! the instantaneous frequency.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::trace;

/// Logic level of the input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Pulse-width timing primitive.
///
/// `pulse_in` returns the duration in microseconds the line spent at
/// `level` for the next complete pulse: it waits out any pulse already
/// in progress, waits for a new pulse to start, and times it until it
/// ends. A return of `Ok(0)` means the timeout elapsed before a complete
/// pulse was observed; `Err` means the underlying hardware read failed.
pub trait PulseInput {
    fn pulse_in(&mut self, level: Level, timeout: Duration) -> io::Result<u64>;
}

/// Pulse input backed by a sysfs GPIO value file.
///
/// Busy-polls the value file with `Instant` timing. The file handle is
/// kept open and rewound before each read.
pub struct GpioPulseInput {
    value_file: File,
}

impl GpioPulseInput {
    /// Open the GPIO value file for polling
    pub fn open(path: &Path) -> io::Result<Self> {
        let value_file = File::open(path)?;
        Ok(Self { value_file })
    }

    /// Read the current logic level of the line
    fn read_level(&mut self) -> io::Result<Level> {
        let mut buf = [0u8; 1];
        self.value_file.seek(SeekFrom::Start(0))?;
        self.value_file.read_exact(&mut buf)?;
        match buf[0] {
            b'0' => Ok(Level::Low),
            _ => Ok(Level::High),
        }
    }

    /// Poll until the line reads `level` (or not, per `want_match`).
    /// Returns false if the deadline passed first.
    fn wait_for(&mut self, level: Level, want_match: bool, deadline: Instant) -> io::Result<bool> {
        loop {
            if (self.read_level()? == level) == want_match {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::hint::spin_loop();
        }
    }
}

impl PulseInput for GpioPulseInput {
    fn pulse_in(&mut self, level: Level, timeout: Duration) -> io::Result<u64> {
        let deadline = Instant::now() + timeout;

        // Wait out a pulse already in progress, then for the next one to start
        if !self.wait_for(level, false, deadline)? {
            return Ok(0);
        }
        if !self.wait_for(level, true, deadline)? {
            return Ok(0);
        }

        let start = Instant::now();
        if !self.wait_for(level, false, deadline)? {
            return Ok(0);
        }
        Ok(start.elapsed().as_micros() as u64)
    }
}

/// Pairs high/low phase reads into an instantaneous frequency
pub struct Sampler<P: PulseInput> {
    input: P,
    timeout: Duration,
}

impl<P: PulseInput> Sampler<P> {
    pub fn new(input: P, timeout: Duration) -> Self {
        Self { input, timeout }
    }

    /// Take one sample: read one high-phase and one low-phase duration and
    /// convert the summed period to Hz.
    ///
    /// Returns `Ok(None)` for a degenerate sample: either phase timed out
    /// (zero duration), which would otherwise produce an infinite or
    /// wildly wrong frequency. Degenerate samples are excluded from both
    /// the valid band and the anomaly histogram.
    pub fn sample(&mut self) -> io::Result<Option<f64>> {
        let high = self.input.pulse_in(Level::High, self.timeout)?;
        let low = self.input.pulse_in(Level::Low, self.timeout)?;

        if high == 0 || low == 0 {
            trace!(high, low, "Degenerate sample (pulse timeout)");
            return Ok(None);
        }

        let period = high + low;
        Ok(Some(1_000_000.0 / period as f64))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedPulseInput;
    use super::*;

    #[test]
    fn test_sample_converts_period_to_hz() {
        // 50 Hz: 20_000 us period
        let input = ScriptedPulseInput::new(vec![(10_000, 10_000)]);
        let mut sampler = Sampler::new(input, Duration::from_millis(100));

        let freq = sampler.sample().unwrap().unwrap();
        assert!((freq - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_asymmetric_phases() {
        // 60 Hz: 16_666 us period, unevenly split
        let input = ScriptedPulseInput::new(vec![(6_666, 10_000)]);
        let mut sampler = Sampler::new(input, Duration::from_millis(100));

        let freq = sampler.sample().unwrap().unwrap();
        assert!((freq - 1_000_000.0 / 16_666.0).abs() < 1e-9);
    }

    #[test]
    fn test_timed_out_phase_is_degenerate() {
        let input = ScriptedPulseInput::new(vec![(0, 10_000), (10_000, 0)]);
        let mut sampler = Sampler::new(input, Duration::from_millis(100));

        assert_eq!(sampler.sample().unwrap(), None);
        assert_eq!(sampler.sample().unwrap(), None);
    }

    #[test]
    fn test_exhausted_script_is_degenerate() {
        let input = ScriptedPulseInput::new(vec![]);
        let mut sampler = Sampler::new(input, Duration::from_millis(100));

        assert_eq!(sampler.sample().unwrap(), None);
    }

    #[test]
    fn test_gpio_pulse_in_times_out_on_static_line() {
        // A line stuck high never completes a pulse in either phase
        let path = std::env::temp_dir().join("linefreq-test-gpio-value");
        std::fs::write(&path, b"1\n").unwrap();

        let mut input = GpioPulseInput::open(&path).unwrap();
        let timeout = Duration::from_millis(10);
        assert_eq!(input.pulse_in(Level::High, timeout).unwrap(), 0);
        assert_eq!(input.pulse_in(Level::Low, timeout).unwrap(), 0);

        std::fs::remove_file(&path).ok();
    }
}
