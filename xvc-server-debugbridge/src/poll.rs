//! Busy-wait calibration shared by the register-polling drivers.
//!
//! Grounded on the `measure_`/`doSleep_`/`pollTime_`/`maxPollDelayUs_`
//! fields threaded through `xvcDrvAxiDbgBridgeIP.cc` and
//! `xvcDrvSerDesTmem.cc`: a fresh connection spins tightly on the status
//! register while the completion latency is cheap to measure, then
//! switches to sleeping once that latency grows past a threshold where
//! spinning would just burn CPU.
use std::time::{Duration, Instant};

const MEASURE_SAMPLES: u32 = 100;
const SLEEP_THRESHOLD: Duration = Duration::from_millis(20);

/// Tracks whether a driver's poll loop should still spin or has learned
/// to sleep instead.
pub struct PollCalibrator {
    samples_taken: u32,
    sleeping: bool,
    measured: Duration,
}

impl Default for PollCalibrator {
    fn default() -> Self {
        PollCalibrator {
            samples_taken: 0,
            sleeping: false,
            measured: Duration::ZERO,
        }
    }
}

impl PollCalibrator {
    pub fn new() -> PollCalibrator {
        PollCalibrator::default()
    }

    /// Blocks until `ready()` reports completion, spinning or sleeping
    /// depending on calibration state, and feeds the observed latency
    /// back into the calibration.
    pub fn wait_until<F: FnMut() -> bool>(&mut self, mut ready: F) {
        let start = Instant::now();
        if self.sleeping {
            while !ready() {
                std::thread::sleep(self.measured.max(Duration::from_micros(1)));
            }
        } else {
            while !ready() {
                std::hint::spin_loop();
            }
        }
        self.record(start.elapsed());
    }

    fn record(&mut self, elapsed: Duration) {
        if self.sleeping {
            return;
        }
        self.measured = elapsed;
        self.samples_taken += 1;
        if self.samples_taken >= MEASURE_SAMPLES || elapsed > SLEEP_THRESHOLD {
            self.sleeping = true;
            log::debug!(
                "poll calibrator switching to sleep mode after {:?} ({} samples)",
                elapsed,
                self.samples_taken
            );
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn switches_to_sleep_after_enough_samples() {
        let mut cal = PollCalibrator::new();
        for _ in 0..MEASURE_SAMPLES {
            cal.wait_until(|| true);
        }
        assert!(cal.is_sleeping());
    }

    #[test]
    fn switches_to_sleep_immediately_on_a_slow_sample() {
        let mut cal = PollCalibrator::new();
        let mut first = true;
        cal.wait_until(|| {
            if first {
                first = false;
                std::thread::sleep(Duration::from_millis(25));
            }
            true
        });
        assert!(cal.is_sleeping());
    }
}
