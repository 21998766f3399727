//! Motion sequencing for an alignment.
//!
//! [`MotionSequencer::align`] drives the three steps of a [`Correction`] in
//! strict order, one goal at a time:
//!
//! ```text
//! ROTATE_TO_HEADING(phi) ─► TRANSLATE(dist) ─► ROTATE_TO_FINAL(theta) ─► DONE
//! ```
//!
//! Each goal is awaited to its terminal status before the next one is sent.
//! A rejected goal aborts the rest of the sequence.  A goal that is accepted
//! but does not succeed is logged as a warning and the sequence carries on
//! with the next step; the returned [`AlignmentReport`] records what every
//! step ended with.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fidalign_hal::{GoalResponse, TrajectoryClient, TrajectoryGoal};
use fidalign_types::{AlignError, BaseJoint, GoalStatus, MotionCommand, ShutdownSignal};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::correction::Correction;

/// Trajectory duration of every step.
pub const DEFAULT_STEP_DURATION: Duration = Duration::from_secs(5);

// ────────────────────────────────────────────────────────────────────────────
// Steps and report
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStep {
    RotateToHeading,
    Translate,
    RotateToFinal,
}

impl AlignmentStep {
    /// Execution order.
    pub const ALL: [AlignmentStep; 3] = [
        AlignmentStep::RotateToHeading,
        AlignmentStep::Translate,
        AlignmentStep::RotateToFinal,
    ];

    pub fn joint(self) -> BaseJoint {
        match self {
            AlignmentStep::RotateToHeading | AlignmentStep::RotateToFinal => {
                BaseJoint::RotateMobileBase
            }
            AlignmentStep::Translate => BaseJoint::TranslateMobileBase,
        }
    }

    /// The correction component this step executes.
    pub fn target(self, correction: &Correction) -> f64 {
        match self {
            AlignmentStep::RotateToHeading => correction.phi,
            AlignmentStep::Translate => correction.dist,
            AlignmentStep::RotateToFinal => correction.theta,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlignmentStep::RotateToHeading => "rotate_to_heading",
            AlignmentStep::Translate => "translate",
            AlignmentStep::RotateToFinal => "rotate_to_final",
        }
    }
}

impl fmt::Display for AlignmentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one attempted step ended with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: AlignmentStep,
    pub command: MotionCommand,
    pub status: GoalStatus,
}

/// Terminal statuses of every step that was accepted, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub steps: Vec<StepOutcome>,
}

impl AlignmentReport {
    /// `true` when all three steps ran and succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.steps.len() == AlignmentStep::ALL.len()
            && self.steps.iter().all(|s| s.status.is_success())
    }

    /// Steps that finished with a non-success status.
    pub fn failed_steps(&self) -> Vec<AlignmentStep> {
        self.steps
            .iter()
            .filter(|s| !s.status.is_success())
            .map(|s| s.step)
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MotionSequencer
// ────────────────────────────────────────────────────────────────────────────

/// Sends the steps of a [`Correction`] to a [`TrajectoryClient`].
#[derive(Clone)]
pub struct MotionSequencer {
    client: Arc<dyn TrajectoryClient>,
    step_duration: Duration,
}

impl MotionSequencer {
    pub fn new(client: Arc<dyn TrajectoryClient>) -> Self {
        Self {
            client,
            step_duration: DEFAULT_STEP_DURATION,
        }
    }

    pub fn with_step_duration(mut self, step_duration: Duration) -> Self {
        self.step_duration = step_duration;
        self
    }

    pub fn step_duration(&self) -> Duration {
        self.step_duration
    }

    /// Execute the correction.
    ///
    /// # Errors
    ///
    /// * [`AlignError::MotionRejected`] – a goal was rejected; later steps
    ///   were not sent.
    /// * [`AlignError::Transport`] – a goal could not be delivered.
    /// * [`AlignError::Interrupted`] – `shutdown` was triggered before a
    ///   step was sent.  A step already in flight is allowed to finish.
    #[instrument(
        skip(self, correction, shutdown),
        fields(
            action = self.client.action_name(),
            phi = correction.phi,
            dist = correction.dist,
            theta = correction.theta
        )
    )]
    pub async fn align(
        &self,
        correction: &Correction,
        shutdown: &ShutdownSignal,
    ) -> Result<AlignmentReport, AlignError> {
        let mut report = AlignmentReport::default();

        for step in AlignmentStep::ALL {
            if shutdown.is_triggered() {
                warn!(
                    %step,
                    completed_steps = report.steps.len(),
                    "alignment interrupted before sending goal"
                );
                return Err(AlignError::Interrupted);
            }

            let command =
                MotionCommand::new(step.joint(), step.target(correction), self.step_duration);
            info!(%step, joint = %command.joint, target = command.target, "sending goal");

            let response = match self.client.send_goal(TrajectoryGoal::from(&command)).await {
                Ok(response) => response,
                Err(e) => {
                    error!(%step, joint = %command.joint, error = %e, "could not send goal");
                    return Err(e);
                }
            };

            let handle = match response {
                GoalResponse::Accepted(handle) => handle,
                GoalResponse::Rejected { reason } => {
                    error!(%step, joint = %command.joint, reason, "goal rejected");
                    return Err(AlignError::MotionRejected {
                        step: step.to_string(),
                        joint: command.joint.to_string(),
                        completed_steps: report.steps.len(),
                    });
                }
            };

            let status = handle.result().await;
            if status.is_success() {
                info!(%step, joint = %command.joint, %status, "goal succeeded");
            } else {
                warn!(
                    %step,
                    joint = %command.joint,
                    %status,
                    "goal did not succeed, continuing with the next step"
                );
            }
            report.steps.push(StepOutcome {
                step,
                command,
                status,
            });
        }

        Ok(report)
    }
}
