//! Dynamic loss-scale bookkeeping.
//!
//! Tensors stay in `f32` on every backend this crate runs on, so the scale is
//! never multiplied into the loss. What remains is the overflow guard: a step
//! whose loss is not finite is skipped and the scale backs off, and a run of
//! finite steps grows it again. The state is checkpointed with the run.

use serde::{Deserialize, Serialize};

pub const INITIAL_SCALE: f64 = 65536.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradScaler {
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    growth_tracker: usize,
    skipped_steps: usize,
}

/// Outcome of one optimizer step under the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerStep {
    Applied,
    Skipped,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self {
            scale: INITIAL_SCALE,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            growth_tracker: 0,
            skipped_steps: 0,
        }
    }
}

impl GradScaler {
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    /// Records one step with a loss of `value` and says whether the optimizer
    /// may apply it.
    pub fn update(&mut self, value: f64) -> ScalerStep {
        if !value.is_finite() {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
            self.skipped_steps += 1;
            log::warn!(
                "non-finite loss {value}, skipping step; loss scale now {}",
                self.scale
            );
            return ScalerStep::Skipped;
        }

        self.growth_tracker += 1;
        if self.growth_tracker == self.growth_interval {
            self.scale *= self.growth_factor;
            self.growth_tracker = 0;
        }
        ScalerStep::Applied
    }
}
