//! Two-phase training schedule.
//!
//! Training first runs with the backbone frozen at a higher learning rate, then unfreezes
//! it and continues at a lower one. Both phases drive the same target and loss code; the
//! schedule only tells an external [`PhaseRunner`] which epochs, batch size, learning rate
//! and freezing to use.

use burn::prelude::*;

use crate::error::{RetinaFaceError, RetinaFaceResult};

/// One contiguous range of epochs trained with fixed settings.
#[derive(Config, Debug)]
pub struct TrainingPhaseConfig {
    pub name: String,
    /// First epoch of the phase.
    pub start_epoch: usize,
    /// Epoch at which the phase ends (exclusive).
    pub end_epoch: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Keep the backbone's leading layers frozen.
    #[config(default = false)]
    pub freeze_backbone: bool,
}

impl TrainingPhaseConfig {
    /// Number of epochs in the phase.
    #[must_use]
    pub const fn epochs(&self) -> usize {
        self.end_epoch.saturating_sub(self.start_epoch)
    }
}

/// Ordered training phases.
#[derive(Config, Debug)]
pub struct TrainingScheduleConfig {
    #[config(default = "default_phases()")]
    pub phases: Vec<TrainingPhaseConfig>,
}

/// Frozen backbone for 50 epochs, then full fine-tuning for 50 more.
fn default_phases() -> Vec<TrainingPhaseConfig> {
    vec![
        TrainingPhaseConfig::new("freeze".to_string(), 0, 50, 8, 1e-3).with_freeze_backbone(true),
        TrainingPhaseConfig::new("unfreeze".to_string(), 50, 100, 4, 1e-4),
    ]
}

/// Executes a single training phase.
///
/// Implemented by the training driver; the schedule calls it once per phase, in order.
pub trait PhaseRunner {
    /// Train every epoch of `phase`.
    ///
    /// # Errors
    ///
    /// Any error aborts the remaining phases.
    fn run_phase(&mut self, phase: &TrainingPhaseConfig) -> RetinaFaceResult<()>;
}

impl TrainingScheduleConfig {
    /// Total number of epochs over all phases.
    #[must_use]
    pub fn total_epochs(&self) -> usize {
        self.phases.iter().map(TrainingPhaseConfig::epochs).sum()
    }

    /// Validate the schedule.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` if there are no phases, a phase
    /// is empty, phases are not contiguous, or a batch size or learning rate is not positive.
    pub fn validate(&self) -> RetinaFaceResult<()> {
        if self.phases.is_empty() {
            return Err(invalid("Training schedule has no phases".to_string()));
        }

        for (index, phase) in self.phases.iter().enumerate() {
            if phase.end_epoch <= phase.start_epoch {
                return Err(invalid(format!(
                    "Phase '{}' must end after it starts ({}..{})",
                    phase.name, phase.start_epoch, phase.end_epoch
                )));
            }
            if phase.batch_size == 0 {
                return Err(invalid(format!("Phase '{}' has a zero batch size", phase.name)));
            }
            if !(phase.learning_rate.is_finite() && phase.learning_rate > 0.0) {
                return Err(invalid(format!(
                    "Phase '{}' has an invalid learning rate: {}",
                    phase.name, phase.learning_rate
                )));
            }
            if let Some(previous) = index.checked_sub(1).map(|i| &self.phases[i]) {
                if previous.end_epoch != phase.start_epoch {
                    return Err(invalid(format!(
                        "Phase '{}' starts at epoch {} but '{}' ends at {}",
                        phase.name, phase.start_epoch, previous.name, previous.end_epoch
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate the schedule and hand every phase to `runner`, in order.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the first error reported by `runner`.
    pub fn run<R: PhaseRunner + ?Sized>(&self, runner: &mut R) -> RetinaFaceResult<()> {
        self.validate()?;

        for phase in &self.phases {
            tracing::info!(
                phase = %phase.name,
                start_epoch = phase.start_epoch,
                end_epoch = phase.end_epoch,
                batch_size = phase.batch_size,
                learning_rate = phase.learning_rate,
                freeze_backbone = phase.freeze_backbone,
                "starting training phase"
            );
            runner.run_phase(phase)?;
        }

        tracing::info!(epochs = self.total_epochs(), "training schedule finished");
        Ok(())
    }
}

fn invalid(reason: String) -> RetinaFaceError {
    RetinaFaceError::InvalidConfiguration { reason }
}
