//! `fidalign-middleware` – rosbridge transport.
//!
//! Connects the aligner to a ROS 2 robot through `rosbridge_server`'s
//! JSON-over-WebSocket protocol, without any ROS client library.
//!
//! # Modules
//!
//! - [`protocol`] – builders and parsers for rosbridge v2 frames and the ROS
//!   message payloads the aligner exchanges (`TFMessage`,
//!   `FollowJointTrajectory` goals).
//! - [`rosbridge`] – [`RosbridgeConnection`]: one WebSocket session with a
//!   writer task, a reader task feeding `/tf` into a
//!   [`TfBuffer`][fidalign_perception::TfBuffer], and id-matched request
//!   tracking.
//! - [`trajectory_client`] – [`RosbridgeTrajectoryClient`]: the
//!   [`TrajectoryClient`][fidalign_hal::TrajectoryClient] implementation for a
//!   real controller.

pub mod protocol;
pub mod rosbridge;
pub mod trajectory_client;

pub use rosbridge::{DEFAULT_ROSBRIDGE_URL, RosbridgeConnection};
pub use trajectory_client::RosbridgeTrajectoryClient;
