//! In-process trajectory server for CI/CD testing without physical hardware.
//!
//! [`SimTrajectoryServer`] implements [`TrajectoryClient`] entirely in memory.
//! Every goal is accepted and succeeds after its trajectory duration unless a
//! different [`SimOutcome`] has been scripted for it.  Successful goals are
//! integrated into a planar [`SimPose`], and every submission and completion
//! is appended to an ordered event log so tests can assert on sequencing.
//!
//! # Example
//!
//! ```rust
//! use fidalign_hal::sim::{SimOutcome, SimTrajectoryServer};
//! use fidalign_types::GoalStatus;
//!
//! // Second goal is rejected, third one aborts.
//! let server = SimTrajectoryServer::new()
//!     .with_outcome(1, SimOutcome::Reject)
//!     .with_outcome(2, SimOutcome::Finish(GoalStatus::Aborted));
//! assert!(server.events().is_empty());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fidalign_types::{AlignError, BaseJoint, GoalStatus};
use tokio::sync::oneshot;
use tracing::debug;

use crate::trajectory::{
    DEFAULT_TRAJECTORY_ACTION, GoalHandle, GoalResponse, TrajectoryClient, TrajectoryGoal,
};

// ────────────────────────────────────────────────────────────────────────────
// Scripted outcomes and observations
// ────────────────────────────────────────────────────────────────────────────

/// What the simulated server does with one goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    /// Accept the goal and finish it with the given status.
    Finish(GoalStatus),
    /// Refuse the goal.
    Reject,
}

impl Default for SimOutcome {
    fn default() -> Self {
        SimOutcome::Finish(GoalStatus::Succeeded)
    }
}

/// Something observable the server did, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Submitted {
        index: usize,
        joint: String,
        target: f64,
    },
    Rejected {
        index: usize,
        joint: String,
    },
    Completed {
        index: usize,
        joint: String,
        status: GoalStatus,
    },
}

/// Planar pose of the simulated base in its start frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl SimPose {
    /// Apply a relative base motion.
    pub fn apply(&mut self, joint: BaseJoint, value: f64) {
        match joint {
            BaseJoint::RotateMobileBase => self.heading += value,
            BaseJoint::TranslateMobileBase => {
                self.x += value * self.heading.cos();
                self.y += value * self.heading.sin();
            }
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    pose: SimPose,
    events: Vec<SimEvent>,
    submitted: usize,
    closed: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// SimTrajectoryServer
// ────────────────────────────────────────────────────────────────────────────

/// A simulated mobile-base trajectory server.  Clones share state.
#[derive(Debug, Clone)]
pub struct SimTrajectoryServer {
    action_name: String,
    outcomes: HashMap<usize, SimOutcome>,
    available: bool,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimTrajectoryServer {
    fn default() -> Self {
        Self {
            action_name: DEFAULT_TRAJECTORY_ACTION.to_string(),
            outcomes: HashMap::new(),
            available: true,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }
}

impl SimTrajectoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the `index`-th submitted goal (0-based).
    pub fn with_outcome(mut self, index: usize, outcome: SimOutcome) -> Self {
        self.outcomes.insert(index, outcome);
        self
    }

    /// Make [`wait_for_server`][TrajectoryClient::wait_for_server] time out.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_action_name(mut self, name: impl Into<String>) -> Self {
        self.action_name = name.into();
        self
    }

    /// Current simulated base pose.
    pub fn pose(&self) -> SimPose {
        self.lock().pose
    }

    /// Everything the server has done so far, in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    /// Number of goals submitted, including rejected ones.
    pub fn submitted(&self) -> usize {
        self.lock().submitted
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TrajectoryClient for SimTrajectoryServer {
    fn action_name(&self) -> &str {
        &self.action_name
    }

    async fn wait_for_server(&self, timeout: Duration) -> bool {
        if !self.available {
            tokio::time::sleep(timeout).await;
        }
        self.available && !self.is_shut_down()
    }

    async fn send_goal(&self, goal: TrajectoryGoal) -> Result<GoalResponse, AlignError> {
        let mut state = self.lock();
        if state.closed {
            return Err(AlignError::Transport(format!(
                "{} is shut down",
                self.action_name
            )));
        }
        let index = state.submitted;
        state.submitted += 1;

        let Some((joint_name, target)) = goal.final_target() else {
            state.events.push(SimEvent::Rejected {
                index,
                joint: String::new(),
            });
            return Ok(GoalResponse::Rejected {
                reason: "goal has no trajectory points".to_string(),
            });
        };
        let joint_name = joint_name.to_string();
        state.events.push(SimEvent::Submitted {
            index,
            joint: joint_name.clone(),
            target,
        });

        let joint = BaseJoint::from_name(&joint_name);
        let outcome = self.outcomes.get(&index).copied().unwrap_or_default();
        let status = match (outcome, joint) {
            (SimOutcome::Finish(status), Some(joint)) => (status, joint),
            (SimOutcome::Reject, _) | (_, None) => {
                debug!(index, joint = %joint_name, "sim rejecting goal");
                state.events.push(SimEvent::Rejected {
                    index,
                    joint: joint_name.clone(),
                });
                return Ok(GoalResponse::Rejected {
                    reason: format!("goal {index} for '{joint_name}' refused"),
                });
            }
        };
        drop(state);

        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.state);
        let delay = goal.duration();
        let (status, joint) = status;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                if status.is_success() {
                    state.pose.apply(joint, target);
                }
                state.events.push(SimEvent::Completed {
                    index,
                    joint: joint_name,
                    status,
                });
            }
            let _ = tx.send(status);
        });

        Ok(GoalResponse::Accepted(GoalHandle::new(goal.goal_id, rx)))
    }

    async fn shutdown(&self) {
        self.lock().closed = true;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fidalign_types::MotionCommand;
    use std::f64::consts::FRAC_PI_2;

    fn goal(joint: BaseJoint, target: f64) -> TrajectoryGoal {
        TrajectoryGoal::single_joint(&MotionCommand::new(joint, target, Duration::from_secs(5)))
    }

    async fn run(
        server: &SimTrajectoryServer,
        joint: BaseJoint,
        target: f64,
    ) -> Option<GoalStatus> {
        match server.send_goal(goal(joint, target)).await.unwrap() {
            GoalResponse::Accepted(handle) => Some(handle.result().await),
            GoalResponse::Rejected { .. } => None,
        }
    }

    #[test]
    fn sim_pose_rotate_then_translate() {
        let mut pose = SimPose::default();
        pose.apply(BaseJoint::RotateMobileBase, FRAC_PI_2);
        pose.apply(BaseJoint::TranslateMobileBase, 2.0);
        assert!(pose.x.abs() < 1e-12);
        assert!((pose.y - 2.0).abs() < 1e-12);
        assert!((pose.heading - FRAC_PI_2).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn default_goal_succeeds_after_its_duration() {
        let server = SimTrajectoryServer::new();
        let start = tokio::time::Instant::now();
        let status = run(&server, BaseJoint::TranslateMobileBase, 1.5).await;
        assert_eq!(status, Some(GoalStatus::Succeeded));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!((server.pose().x - 1.5).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_rejection_is_reported() {
        let server = SimTrajectoryServer::new().with_outcome(0, SimOutcome::Reject);
        assert_eq!(run(&server, BaseJoint::RotateMobileBase, 0.3).await, None);
        assert_eq!(server.pose(), SimPose::default());
        assert!(matches!(server.events()[1], SimEvent::Rejected { index: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_goal_does_not_move_the_base() {
        let server =
            SimTrajectoryServer::new().with_outcome(0, SimOutcome::Finish(GoalStatus::Aborted));
        let status = run(&server, BaseJoint::TranslateMobileBase, 1.0).await;
        assert_eq!(status, Some(GoalStatus::Aborted));
        assert_eq!(server.pose(), SimPose::default());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_joint_is_rejected() {
        let server = SimTrajectoryServer::new();
        let goal = TrajectoryGoal {
            goal_id: uuid::Uuid::new_v4(),
            joint_names: vec!["joint_lift".to_string()],
            points: vec![crate::trajectory::TrajectoryPoint {
                positions: vec![0.5],
                time_from_start: Duration::from_secs(1),
            }],
        };
        let response = server.send_goal(goal).await.unwrap();
        assert!(matches!(response, GoalResponse::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_logged_in_order() {
        let server = SimTrajectoryServer::new();
        run(&server, BaseJoint::RotateMobileBase, 0.1).await;
        run(&server, BaseJoint::TranslateMobileBase, 0.2).await;

        let events = server.events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SimEvent::Submitted { index: 0, .. }));
        assert!(matches!(events[1], SimEvent::Completed { index: 0, .. }));
        assert!(matches!(events[2], SimEvent::Submitted { index: 1, .. }));
        assert!(matches!(events[3], SimEvent::Completed { index: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_refuses_further_goals() {
        let server = SimTrajectoryServer::new();
        server.shutdown().await;
        assert!(server.is_shut_down());
        let err = server.send_goal(goal(BaseJoint::RotateMobileBase, 0.1)).await.unwrap_err();
        assert!(matches!(err, AlignError::Transport(_)));
        assert!(!server.wait_for_server(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_server_times_out() {
        let server = SimTrajectoryServer::new().unavailable();
        let start = tokio::time::Instant::now();
        assert!(!server.wait_for_server(Duration::from_secs(60)).await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
