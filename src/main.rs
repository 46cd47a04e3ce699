//! linefreq: a powerline frequency meter
//!
//! Times the high/low phases of a squared-off AC signal on a digital
//! input, aggregates the samples into a mean frequency plus an anomaly
//! histogram, and serves the results over a minimal plain-text protocol:
//! - `frequency`: mean frequency and accepted sample count
//! - `anomalies`: histogram of out-of-band frequencies
//! - `alldata`: both
//!
//! Everything runs on one thread: a measurement batch, then a window of
//! connection polling, repeated forever. Sequential execution is what
//! keeps report reads consistent with batch state.

mod config;
mod meter;
mod protocol;
mod report;
mod sampler;
mod server;

use std::thread;
use std::time::{Duration, Instant};

use config::Config;
use meter::FrequencyMeter;
use sampler::{GpioPulseInput, Sampler};
use server::{Responder, Session};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sleep between empty accept polls inside the serving window
const IDLE_POLL_SLEEP: Duration = Duration::from_millis(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        gpio_pin = config.gpio_pin,
        gpio_path = %config.gpio_path.display(),
        samples = config.samples,
        pulse_timeout_ms = config.pulse_timeout_ms,
        "Starting linefreq meter"
    );

    run(config)
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let input = GpioPulseInput::open(&config.gpio_path)?;
    let mut sampler = Sampler::new(input, Duration::from_millis(config.pulse_timeout_ms));
    let mut meter = FrequencyMeter::new();

    // Blocks, retrying, until the listener is up
    let session = Session::establish(&config)?;
    let responder = Responder::new(session, Duration::from_millis(config.request_timeout_ms));

    let poll_window = Duration::from_millis(config.poll_window_ms);

    loop {
        meter.measure(&mut sampler, config.samples);

        // Serve whatever clients show up before the next batch
        let window_end = Instant::now() + poll_window;
        while Instant::now() < window_end {
            if !responder.poll(meter.state()) {
                thread::sleep(IDLE_POLL_SLEEP);
            }
        }
    }
}
