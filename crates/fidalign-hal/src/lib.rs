//! `fidalign-hal` – the base controller interface.
//!
//! # Modules
//!
//! - [`trajectory`] – [`TrajectoryClient`][trajectory::TrajectoryClient]: the
//!   trait every trajectory-controller transport implements, together with
//!   the goal and handle types it exchanges.
//! - [`sim`] – [`SimTrajectoryServer`][sim::SimTrajectoryServer]: in-memory
//!   controller with scripted outcomes, a simulated base pose and an ordered
//!   event log.

pub mod sim;
pub mod trajectory;

pub use sim::{SimEvent, SimOutcome, SimPose, SimTrajectoryServer};
pub use trajectory::{
    DEFAULT_TRAJECTORY_ACTION, GoalHandle, GoalResponse, TrajectoryClient, TrajectoryGoal,
    TrajectoryPoint,
};
