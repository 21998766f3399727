use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mobile-base joints that accept single-value trajectory goals.
///
/// The base is driven as two virtual joints: an in-place rotation and a
/// straight-line translation, both relative to the current pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseJoint {
    /// Rotate in place by the target value (radians).
    RotateMobileBase,
    /// Drive straight ahead by the target value (metres).
    TranslateMobileBase,
}

impl BaseJoint {
    /// Joint name as understood by the trajectory controller.
    pub fn as_str(self) -> &'static str {
        match self {
            BaseJoint::RotateMobileBase => "rotate_mobile_base",
            BaseJoint::TranslateMobileBase => "translate_mobile_base",
        }
    }

    /// Parse a controller joint name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rotate_mobile_base" => Some(BaseJoint::RotateMobileBase),
            "translate_mobile_base" => Some(BaseJoint::TranslateMobileBase),
            _ => None,
        }
    }
}

impl fmt::Display for BaseJoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-joint motion request: move `joint` by `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub joint: BaseJoint,
    pub target: f64,
    pub duration: Duration,
}

impl MotionCommand {
    pub fn new(joint: BaseJoint, target: f64, duration: Duration) -> Self {
        Self {
            joint,
            target,
            duration,
        }
    }
}

/// Lifecycle status of a trajectory goal.
///
/// Discriminants follow the ROS 2 `action_msgs/msg/GoalStatus` codes so they
/// can be logged and exchanged verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalStatus {
    Unknown = 0,
    Accepted = 1,
    Executing = 2,
    Canceling = 3,
    Succeeded = 4,
    Canceled = 5,
    Aborted = 6,
}

impl GoalStatus {
    /// Numeric status code.
    pub fn code(self) -> i8 {
        self as i8
    }

    /// Map a numeric status code back to a [`GoalStatus`].  Unrecognised codes
    /// map to [`GoalStatus::Unknown`].
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => GoalStatus::Accepted,
            2 => GoalStatus::Executing,
            3 => GoalStatus::Canceling,
            4 => GoalStatus::Succeeded,
            5 => GoalStatus::Canceled,
            6 => GoalStatus::Aborted,
            _ => GoalStatus::Unknown,
        }
    }

    pub fn is_success(self) -> bool {
        self == GoalStatus::Succeeded
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalStatus::Unknown => "UNKNOWN",
            GoalStatus::Accepted => "ACCEPTED",
            GoalStatus::Executing => "EXECUTING",
            GoalStatus::Canceling => "CANCELING",
            GoalStatus::Succeeded => "SUCCEEDED",
            GoalStatus::Canceled => "CANCELED",
            GoalStatus::Aborted => "ABORTED",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Operator abort flag shared between the Ctrl-C handler and the control
/// task.  Clones share the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown.  Idempotent.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Error type for every fatal outcome of an alignment run.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlignError {
    #[error(
        "Timeout waiting for transform to '{marker_frame}' after {elapsed_secs:.1}s ({} failed attempts): {}",
        .attempts.len(),
        .attempts.join(", ")
    )]
    AcquisitionTimeout {
        marker_frame: String,
        elapsed_secs: f64,
        attempts: Vec<String>,
    },

    #[error(
        "Goal for {joint} was rejected at step {step} ({completed_steps} step(s) already executed)"
    )]
    MotionRejected {
        step: String,
        joint: String,
        completed_steps: usize,
    },

    #[error("Trajectory server '{server}' unavailable after {timeout_secs:.1}s")]
    ServerUnavailable { server: String, timeout_secs: f64 },

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_joint_names_match_controller() {
        assert_eq!(BaseJoint::RotateMobileBase.as_str(), "rotate_mobile_base");
        assert_eq!(
            BaseJoint::TranslateMobileBase.to_string(),
            "translate_mobile_base"
        );
    }

    #[test]
    fn base_joint_parses_controller_names() {
        assert_eq!(
            BaseJoint::from_name("rotate_mobile_base"),
            Some(BaseJoint::RotateMobileBase)
        );
        assert_eq!(BaseJoint::from_name("joint_lift"), None);
    }

    #[test]
    fn base_joint_serializes_snake_case() {
        let json = serde_json::to_string(&BaseJoint::TranslateMobileBase).unwrap();
        assert_eq!(json, "\"translate_mobile_base\"");
    }

    #[test]
    fn goal_status_codes_roundtrip() {
        for status in [
            GoalStatus::Unknown,
            GoalStatus::Accepted,
            GoalStatus::Executing,
            GoalStatus::Canceling,
            GoalStatus::Succeeded,
            GoalStatus::Canceled,
            GoalStatus::Aborted,
        ] {
            assert_eq!(GoalStatus::from_code(status.code() as i64), status);
        }
        assert_eq!(GoalStatus::from_code(42), GoalStatus::Unknown);
    }

    #[test]
    fn goal_status_display_includes_code() {
        assert_eq!(GoalStatus::Aborted.to_string(), "ABORTED (6)");
        assert!(GoalStatus::Succeeded.is_success());
        assert!(!GoalStatus::Canceled.is_success());
    }

    #[test]
    fn shutdown_signal_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let handler_copy = signal.clone();
        assert!(!signal.is_triggered());
        handler_copy.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn acquisition_timeout_display_lists_attempts() {
        let err = AlignError::AcquisitionTimeout {
            marker_frame: "bowl".to_string(),
            elapsed_secs: 121.0,
            attempts: vec![
                "base_link → bowl".to_string(),
                "exception: frame 'bowl' is stale".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("'bowl'"));
        assert!(msg.contains("2 failed attempts"));
        assert!(msg.contains("base_link → bowl, exception"));
    }

    #[test]
    fn motion_rejected_display_names_joint() {
        let err = AlignError::MotionRejected {
            step: "translate".to_string(),
            joint: "translate_mobile_base".to_string(),
            completed_steps: 1,
        };
        assert!(err.to_string().contains("translate_mobile_base"));
    }

    #[test]
    fn motion_command_roundtrip() {
        let cmd = MotionCommand::new(BaseJoint::RotateMobileBase, -0.5, Duration::from_secs(5));
        let json = serde_json::to_string(&cmd).unwrap();
        let back: MotionCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }
}
