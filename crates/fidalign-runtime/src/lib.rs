//! `fidalign-runtime` – the alignment controller.
//!
//! Turns a marker pose into base motion and runs the whole operation end to
//! end.
//!
//! # Modules
//!
//! - [`correction`] – [`compute_correction`][correction::compute_correction]:
//!   pure geometry from marker pose and standoff offset to the
//!   `(phi, dist, theta)` rotate/translate/rotate correction.
//! - [`sequencer`] – [`MotionSequencer`][sequencer::MotionSequencer]: sends
//!   the three steps in order through a
//!   [`TrajectoryClient`][fidalign_hal::TrajectoryClient], aborting on
//!   rejection and carrying on after a step that merely failed.
//! - [`session`] – [`AlignmentSession`][session::AlignmentSession]: acquire,
//!   wait for the server, compute, move, and always release the client.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP span export.

pub mod correction;
pub mod sequencer;
pub mod session;
pub mod telemetry;

pub use correction::{Correction, DEFAULT_OFFSET_M, compute_correction};
pub use sequencer::{
    AlignmentReport, AlignmentStep, DEFAULT_STEP_DURATION, MotionSequencer, StepOutcome,
};
pub use session::{AlignmentSession, DEFAULT_SERVER_TIMEOUT, SessionConfig, SessionOutcome};
pub use telemetry::{TracerProviderGuard, init_tracing};
