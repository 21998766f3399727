//! [`TrajectoryClient`] over rosbridge.
//!
//! rosbridge has no acceptance frame for action goals.  It answers a
//! `send_action_goal` exactly once: with the `action_result` when the goal
//! ran, or with a status-less failed `action_result` (or an error `status`)
//! when the goal never reached the controller.  [`send_goal`] therefore waits
//! for that single reply and only then decides between accepted and
//! rejected.
//!
//! [`send_goal`]: RosbridgeTrajectoryClient::send_goal

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fidalign_hal::{GoalHandle, GoalResponse, TrajectoryClient, TrajectoryGoal};
use fidalign_types::{AlignError, GoalStatus};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{
    ACTION_SERVERS_SERVICE, FOLLOW_JOINT_TRAJECTORY_TYPE, InboundFrame, parse_action_servers,
    same_action, trajectory_goal_args,
};
use crate::rosbridge::RosbridgeConnection;

/// How often `wait_for_server` asks rosapi for the action list.
pub const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-call timeout for the rosapi query.
const SERVICE_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Joint-trajectory action client on a shared [`RosbridgeConnection`].
#[derive(Debug, Clone)]
pub struct RosbridgeTrajectoryClient {
    connection: Arc<RosbridgeConnection>,
    action_name: String,
}

impl RosbridgeTrajectoryClient {
    pub fn new(connection: Arc<RosbridgeConnection>, action_name: impl Into<String>) -> Self {
        Self {
            connection,
            action_name: action_name.into(),
        }
    }

    pub fn connection(&self) -> &Arc<RosbridgeConnection> {
        &self.connection
    }

    async fn server_listed(&self, timeout: Duration) -> bool {
        match self
            .connection
            .call_service(ACTION_SERVERS_SERVICE, json!({}), timeout)
            .await
        {
            Ok(values) => parse_action_servers(&values)
                .iter()
                .any(|name| same_action(name, &self.action_name)),
            Err(e) => {
                debug!(error = %e, "action server query failed");
                false
            }
        }
    }
}

/// Outcome of a goal, read from rosbridge's reply.  `None` means the
/// connection went away before a reply arrived.
fn goal_response(goal_id: Uuid, reply: Option<InboundFrame>) -> GoalResponse {
    let status = match reply {
        Some(InboundFrame::GoalRefused { reason, .. }) => {
            return GoalResponse::Rejected { reason };
        }
        Some(InboundFrame::Status { level, msg, .. }) => {
            warn!(status_level = %level, detail = %msg, "trajectory goal refused by rosbridge");
            return GoalResponse::Rejected {
                reason: format!("{level}: {msg}"),
            };
        }
        Some(InboundFrame::ActionResult { status, .. }) => status,
        Some(other) => {
            debug!(frame = ?other, "unexpected reply to trajectory goal");
            GoalStatus::Unknown
        }
        None => GoalStatus::Unknown,
    };

    let (tx, rx) = oneshot::channel();
    let _ = tx.send(status);
    GoalResponse::Accepted(GoalHandle::new(goal_id, rx))
}

#[async_trait]
impl TrajectoryClient for RosbridgeTrajectoryClient {
    fn action_name(&self) -> &str {
        &self.action_name
    }

    async fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.connection.is_closed() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self
                .server_listed(remaining.min(SERVICE_CALL_TIMEOUT))
                .await
            {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::sleep(SERVER_POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn send_goal(&self, goal: TrajectoryGoal) -> Result<GoalResponse, AlignError> {
        let id = format!("send_action_goal:{}", goal.goal_id);
        let reply = self.connection.send_action_goal(
            &id,
            &self.action_name,
            FOLLOW_JOINT_TRAJECTORY_TYPE,
            trajectory_goal_args(&goal),
        )?;

        Ok(goal_response(goal.goal_id, reply.await.ok()))
    }

    async fn shutdown(&self) {
        self.connection.close().await;
    }
}
