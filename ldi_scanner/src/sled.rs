/*!
Moving the sled from the host, outside of an exposure.

During an exposure the PRU steps the sled itself. Here the host toggles the
stepper pins directly, timed with sleeps, so moves are not smooth on a busy
system. Good enough to bring the board into position.
*/

use crate::gpio::{pins, GpioMap};
use anyhow::{ensure, Result};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Subtracted from the step period for the time spent toggling pins
const STEP_OVERHEAD_NS: f64 = 50_000.0;

/// The first step waits this many base periods extra
const ACCELERATION_START: f64 = 3.0;

/// Per-step decay of the extra wait
const ACCELERATION_DECAY: f64 = 1.01;

/// Busy-wait iterations holding the step pin high
const STEP_PULSE_SPINS: usize = 1000;

pub trait SledControl {
    /// Move by `mm`, negative towards the back. Returns how far the sled
    /// actually went, which is less if an end switch triggered.
    fn move_mm(&mut self, mm: f64) -> f64;
}

/// Whole steps of a move, rounded towards zero
pub fn step_count(mm: f64, mm_per_step: f64) -> u64 {
    (mm / mm_per_step).abs() as u64
}

/// Wait after each step: the base period plus a decaying extra for a crude
/// acceleration ramp.
#[derive(Debug, Clone)]
pub struct StepDelays {
    base_ns: f64,
    extra_ns: f64,
}

impl StepDelays {
    pub fn new(step_frequency_hz: f64) -> Self {
        let base_ns = (1e9 / step_frequency_hz - STEP_OVERHEAD_NS).max(0.0);
        Self {
            base_ns,
            extra_ns: base_ns * ACCELERATION_START,
        }
    }
}

impl Iterator for StepDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = Duration::from_nanos((self.base_ns + self.extra_ns) as u64);
        self.extra_ns /= ACCELERATION_DECAY;
        Some(delay)
    }
}

/// Sled driven through the stepper driver pins
pub struct GpioSled {
    gpio: GpioMap,
    step_frequency_hz: f64,
    mm_per_step: f64,
}

impl GpioSled {
    pub fn new(step_frequency_hz: f64, mm_per_step: f64) -> Result<Self> {
        ensure!(
            step_frequency_hz.is_finite() && step_frequency_hz > 0.0,
            "Sled step frequency must be positive, got {step_frequency_hz}"
        );
        ensure!(mm_per_step > 0.0, "Sled mm per step must be positive, got {mm_per_step}");

        let mut gpio = GpioMap::open()?;
        for pin in [pins::SLED_STEP, pins::SLED_DIR, pins::SLED_ENABLE] {
            gpio.make_output(pin);
        }
        gpio.set(pins::SLED_ENABLE);
        Ok(Self {
            gpio,
            step_frequency_hz,
            mm_per_step,
        })
    }
}

impl SledControl for GpioSled {
    fn move_mm(&mut self, mm: f64) -> f64 {
        let (end_switch, sign) = if mm < 0.0 {
            self.gpio.set(pins::SLED_DIR);
            (pins::END_SWITCH_BACK, -1.0)
        } else {
            self.gpio.clear(pins::SLED_DIR);
            (pins::END_SWITCH_FRONT, 1.0)
        };
        let steps = step_count(mm, self.mm_per_step);
        debug!("Sled move {:.3}mm: {} steps", mm, steps);

        self.gpio.clear(pins::SLED_ENABLE);
        let mut done = 0u64;
        for delay in StepDelays::new(self.step_frequency_hz).take(steps as usize) {
            // End switches pull low
            if !self.gpio.get(end_switch) {
                warn!("End switch hit after {} of {} steps", done, steps);
                break;
            }
            self.gpio.set(pins::SLED_STEP);
            for _ in 0..STEP_PULSE_SPINS {
                std::hint::spin_loop();
            }
            self.gpio.clear(pins::SLED_STEP);
            thread::sleep(delay);
            done += 1;
        }
        self.gpio.set(pins::SLED_ENABLE);
        done as f64 * self.mm_per_step * sign
    }
}

impl Drop for GpioSled {
    fn drop(&mut self) {
        self.gpio.set(pins::SLED_ENABLE);
    }
}

/// Sled stand-in for dry runs, keeping track of where it would be
#[derive(Debug, Clone)]
pub struct DrySled {
    mm_per_step: f64,
    position_mm: f64,
}

impl DrySled {
    pub fn new(mm_per_step: f64) -> Self {
        Self {
            mm_per_step,
            position_mm: 0.0,
        }
    }

    /// Sum of all moves so far
    pub fn position_mm(&self) -> f64 {
        self.position_mm
    }
}

impl SledControl for DrySled {
    fn move_mm(&mut self, mm: f64) -> f64 {
        let moved = step_count(mm, self.mm_per_step) as f64 * self.mm_per_step * mm.signum();
        self.position_mm += moved;
        info!("🧪 Dry-run: sled moves {:.3}mm, now at {:.3}mm", moved, self.position_mm);
        moved
    }
}
