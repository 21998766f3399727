//! rosbridge v2 JSON frames.
//!
//! Builders for the outbound operations the aligner needs (`subscribe`,
//! `call_service`, `send_action_goal`) and a parser that classifies inbound
//! frames by their `op` field.  Message payloads follow the ROS 2 JSON
//! encoding used by `rosbridge_server`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fidalign_hal::TrajectoryGoal;
use fidalign_perception::{Quaternion, StampedTransform, Transform3D, Vec3};
use fidalign_types::{AlignError, GoalStatus};
use serde_json::{Value, json};

pub const TF_TOPIC: &str = "/tf";
pub const TF_STATIC_TOPIC: &str = "/tf_static";
pub const TF_MESSAGE_TYPE: &str = "tf2_msgs/msg/TFMessage";
pub const FOLLOW_JOINT_TRAJECTORY_TYPE: &str = "control_msgs/action/FollowJointTrajectory";
/// rosapi service listing the action servers currently advertised.
pub const ACTION_SERVERS_SERVICE: &str = "/rosapi/action_servers";

// ────────────────────────────────────────────────────────────────────────────
// Outbound
// ────────────────────────────────────────────────────────────────────────────

pub fn subscribe_frame(id: &str, topic: &str, msg_type: &str) -> Value {
    json!({
        "op": "subscribe",
        "id": id,
        "topic": topic,
        "type": msg_type,
    })
}

pub fn call_service_frame(id: &str, service: &str, args: Value) -> Value {
    json!({
        "op": "call_service",
        "id": id,
        "service": service,
        "args": args,
    })
}

pub fn send_action_goal_frame(id: &str, action: &str, action_type: &str, args: Value) -> Value {
    json!({
        "op": "send_action_goal",
        "id": id,
        "action": action,
        "action_type": action_type,
        "args": args,
        "feedback": false,
    })
}

/// `builtin_interfaces/msg/Duration`.
pub fn ros_duration(d: Duration) -> Value {
    json!({ "sec": d.as_secs(), "nanosec": d.subsec_nanos() })
}

/// `FollowJointTrajectory` goal arguments for `goal`.
pub fn trajectory_goal_args(goal: &TrajectoryGoal) -> Value {
    let points: Vec<Value> = goal
        .points
        .iter()
        .map(|p| {
            json!({
                "positions": p.positions,
                "time_from_start": ros_duration(p.time_from_start),
            })
        })
        .collect();
    json!({
        "trajectory": {
            "joint_names": goal.joint_names,
            "points": points,
        }
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound
// ────────────────────────────────────────────────────────────────────────────

/// An inbound rosbridge frame, classified by `op`.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Publish {
        topic: String,
        msg: Value,
    },
    ServiceResponse {
        id: String,
        values: Value,
        result: bool,
    },
    ActionResult {
        id: String,
        status: GoalStatus,
        values: Value,
    },
    /// An `action_result` with `result: false` and no status: the goal never
    /// reached the action server.
    GoalRefused {
        id: String,
        reason: String,
    },
    /// Server-side diagnostics, e.g. a refused operation.
    Status {
        id: Option<String>,
        level: String,
        msg: String,
    },
    Other(String),
}

impl InboundFrame {
    /// Request id this frame answers, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundFrame::ServiceResponse { id, .. }
            | InboundFrame::ActionResult { id, .. }
            | InboundFrame::GoalRefused { id, .. } => Some(id),
            InboundFrame::Status { id, .. } => id.as_deref(),
            _ => None,
        }
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn f64_field(v: &Value, key: &str) -> Result<f64, AlignError> {
    v.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| AlignError::Serialization(format!("missing numeric field '{key}'")))
}

/// Parse one text frame.
///
/// # Errors
///
/// [`AlignError::Serialization`] when the text is not a JSON object with an
/// `op` field.
pub fn parse_frame(text: &str) -> Result<InboundFrame, AlignError> {
    let v: Value =
        serde_json::from_str(text).map_err(|e| AlignError::Serialization(e.to_string()))?;
    let op = v
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| AlignError::Serialization("frame has no 'op'".to_string()))?;

    let frame = match op {
        "publish" => InboundFrame::Publish {
            topic: str_field(&v, "topic"),
            msg: v.get("msg").cloned().unwrap_or(Value::Null),
        },
        "service_response" => InboundFrame::ServiceResponse {
            id: str_field(&v, "id"),
            values: v.get("values").cloned().unwrap_or(Value::Null),
            result: v.get("result").and_then(Value::as_bool).unwrap_or(false),
        },
        "action_result" => {
            let result = v.get("result").and_then(Value::as_bool).unwrap_or(false);
            let values = v.get("values").cloned().unwrap_or(Value::Null);
            let status = match v.get("status").and_then(Value::as_i64) {
                Some(code) => GoalStatus::from_code(code),
                None if result => GoalStatus::Succeeded,
                None => {
                    let reason = match &values {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    return Ok(InboundFrame::GoalRefused {
                        id: str_field(&v, "id"),
                        reason,
                    });
                }
            };
            InboundFrame::ActionResult {
                id: str_field(&v, "id"),
                status,
                values,
            }
        }
        "status" => InboundFrame::Status {
            id: v.get("id").and_then(Value::as_str).map(str::to_string),
            level: str_field(&v, "level"),
            msg: str_field(&v, "msg"),
        },
        other => InboundFrame::Other(other.to_string()),
    };
    Ok(frame)
}

fn frame_name(v: &Value, key: &str) -> String {
    str_field(v, key).trim_start_matches('/').to_string()
}

/// Convert a `tf2_msgs/msg/TFMessage` into stamped transforms.
///
/// Entries are stamped with `received_at` rather than their header stamp so
/// staleness is judged on the local clock.
///
/// # Errors
///
/// [`AlignError::Serialization`] if `transforms` is missing or an entry lacks
/// a translation or rotation component.
pub fn parse_tf_message(
    msg: &Value,
    received_at: DateTime<Utc>,
) -> Result<Vec<StampedTransform>, AlignError> {
    let entries = msg
        .get("transforms")
        .and_then(Value::as_array)
        .ok_or_else(|| AlignError::Serialization("TFMessage has no 'transforms'".to_string()))?;

    entries
        .iter()
        .map(|entry| {
            let header = entry.get("header").unwrap_or(&Value::Null);
            let tf = entry.get("transform").unwrap_or(&Value::Null);
            let t = tf.get("translation").unwrap_or(&Value::Null);
            let r = tf.get("rotation").unwrap_or(&Value::Null);
            let transform = Transform3D::new(
                Vec3::new(f64_field(t, "x")?, f64_field(t, "y")?, f64_field(t, "z")?),
                Quaternion::new(
                    f64_field(r, "x")?,
                    f64_field(r, "y")?,
                    f64_field(r, "z")?,
                    f64_field(r, "w")?,
                ),
            );
            Ok(StampedTransform::new(
                frame_name(header, "frame_id"),
                frame_name(entry, "child_frame_id"),
                received_at,
                transform,
            ))
        })
        .collect()
}

/// Build a `TFMessage` carrying `transforms`.  Used by the loopback tests and
/// handy for publishing simulated frames.
pub fn tf_message(transforms: &[StampedTransform]) -> Value {
    let entries: Vec<Value> = transforms
        .iter()
        .map(|st| {
            let t = st.transform.translation;
            let r = st.transform.rotation;
            json!({
                "header": {
                    "stamp": {
                        "sec": st.stamp.timestamp(),
                        "nanosec": st.stamp.timestamp_subsec_nanos(),
                    },
                    "frame_id": st.frame_id,
                },
                "child_frame_id": st.child_frame_id,
                "transform": {
                    "translation": { "x": t.x, "y": t.y, "z": t.z },
                    "rotation": { "x": r.x, "y": r.y, "z": r.z, "w": r.w },
                },
            })
        })
        .collect();
    json!({ "transforms": entries })
}

/// Action names listed in a `/rosapi/action_servers` response.
pub fn parse_action_servers(values: &Value) -> Vec<String> {
    values
        .get("action_servers")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Action names compare equal with or without a leading slash.
pub fn same_action(a: &str, b: &str) -> bool {
    a.trim_start_matches('/') == b.trim_start_matches('/')
}
