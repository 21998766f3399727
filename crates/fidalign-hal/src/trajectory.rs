//! Generic `TrajectoryClient` trait for the mobile-base trajectory controller.
//!
//! The controller accepts `FollowJointTrajectory`-style goals: a list of joint
//! names and timed target points.  A submitted goal is first accepted or
//! rejected; an accepted goal later resolves to a terminal [`GoalStatus`]
//! delivered through its [`GoalHandle`].
//!
//! Drivers implement [`TrajectoryClient`] so the alignment logic never depends
//! on the transport (in-process simulation, rosbridge, …).

use std::time::Duration;

use async_trait::async_trait;
use fidalign_types::{AlignError, GoalStatus, MotionCommand};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Action served by the Stretch base controller.
pub const DEFAULT_TRAJECTORY_ACTION: &str = "/stretch_controller/follow_joint_trajectory";

/// One timed waypoint of a joint trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    /// One value per entry in [`TrajectoryGoal::joint_names`].
    pub positions: Vec<f64>,
    pub time_from_start: Duration,
}

/// A joint trajectory goal.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryGoal {
    pub goal_id: Uuid,
    pub joint_names: Vec<String>,
    pub points: Vec<TrajectoryPoint>,
}

impl TrajectoryGoal {
    /// A goal moving a single joint to one target, reached after the
    /// command's duration.
    pub fn single_joint(command: &MotionCommand) -> Self {
        Self {
            goal_id: Uuid::new_v4(),
            joint_names: vec![command.joint.as_str().to_string()],
            points: vec![TrajectoryPoint {
                positions: vec![command.target],
                time_from_start: command.duration,
            }],
        }
    }

    /// Time at which the last waypoint should be reached.
    pub fn duration(&self) -> Duration {
        self.points
            .last()
            .map(|p| p.time_from_start)
            .unwrap_or_default()
    }

    /// First joint name and its final target, if the goal has any.
    pub fn final_target(&self) -> Option<(&str, f64)> {
        let joint = self.joint_names.first()?;
        let value = self.points.last()?.positions.first()?;
        Some((joint.as_str(), *value))
    }
}

impl From<&MotionCommand> for TrajectoryGoal {
    fn from(command: &MotionCommand) -> Self {
        Self::single_joint(command)
    }
}

/// Handle to an accepted goal.  Await [`GoalHandle::result`] for the terminal
/// status.
#[derive(Debug)]
pub struct GoalHandle {
    goal_id: Uuid,
    result: oneshot::Receiver<GoalStatus>,
}

impl GoalHandle {
    pub fn new(goal_id: Uuid, result: oneshot::Receiver<GoalStatus>) -> Self {
        Self { goal_id, result }
    }

    pub fn goal_id(&self) -> Uuid {
        self.goal_id
    }

    /// Wait for the goal to finish.
    ///
    /// Returns [`GoalStatus::Unknown`] if the driver dropped the goal without
    /// ever reporting a result (e.g. the connection was lost).
    pub async fn result(self) -> GoalStatus {
        self.result.await.unwrap_or(GoalStatus::Unknown)
    }
}

/// Answer to a goal submission.
#[derive(Debug)]
pub enum GoalResponse {
    Accepted(GoalHandle),
    Rejected { reason: String },
}

/// A client of a joint-trajectory action server.
#[async_trait]
pub trait TrajectoryClient: Send + Sync {
    /// Name of the action this client talks to, for log messages.
    fn action_name(&self) -> &str;

    /// Wait until the action server is reachable.  Returns `false` if it did
    /// not show up within `timeout`.
    async fn wait_for_server(&self, timeout: Duration) -> bool;

    /// Submit a goal and wait for it to be accepted or rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AlignError::Transport`] if the goal could not be delivered.
    async fn send_goal(&self, goal: TrajectoryGoal) -> Result<GoalResponse, AlignError>;

    /// Release the connection.  Subsequent submissions fail.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidalign_types::BaseJoint;

    #[test]
    fn single_joint_goal_carries_command() {
        let cmd = MotionCommand::new(BaseJoint::TranslateMobileBase, 0.42, Duration::from_secs(5));
        let goal = TrajectoryGoal::from(&cmd);
        assert_eq!(goal.joint_names, vec!["translate_mobile_base".to_string()]);
        assert_eq!(goal.points.len(), 1);
        assert_eq!(goal.duration(), Duration::from_secs(5));
        assert_eq!(goal.final_target(), Some(("translate_mobile_base", 0.42)));
    }

    #[test]
    fn every_goal_gets_a_fresh_id() {
        let cmd = MotionCommand::new(BaseJoint::RotateMobileBase, 1.0, Duration::from_secs(5));
        assert_ne!(TrajectoryGoal::from(&cmd).goal_id, TrajectoryGoal::from(&cmd).goal_id);
    }

    #[test]
    fn empty_goal_has_no_target() {
        let goal = TrajectoryGoal {
            goal_id: Uuid::new_v4(),
            joint_names: vec![],
            points: vec![],
        };
        assert_eq!(goal.final_target(), None);
        assert_eq!(goal.duration(), Duration::ZERO);
    }

    #[tokio::test]
    async fn goal_handle_yields_reported_status() {
        let (tx, rx) = oneshot::channel();
        let handle = GoalHandle::new(Uuid::new_v4(), rx);
        tx.send(GoalStatus::Aborted).unwrap();
        assert_eq!(handle.result().await, GoalStatus::Aborted);
    }

    #[tokio::test]
    async fn dropped_goal_resolves_to_unknown() {
        let (tx, rx) = oneshot::channel::<GoalStatus>();
        let handle = GoalHandle::new(Uuid::new_v4(), rx);
        drop(tx);
        assert_eq!(handle.result().await, GoalStatus::Unknown);
    }
}
