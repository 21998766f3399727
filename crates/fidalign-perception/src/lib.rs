//! `fidalign-perception` – where the marker is.
//!
//! Resolves named reference frames into poses relative to the robot base and
//! waits for a fiducial marker to become visible.
//!
//! # Modules
//!
//! - [`transform`] – [`TfBuffer`][transform::TfBuffer]: thread-safe frame
//!   graph of stamped rigid-body transforms, plus the
//!   [`TransformSource`][transform::TransformSource] trait the acquisition
//!   loop polls.
//! - [`acquisition`] – [`acquire_marker`][acquisition::acquire_marker]: the
//!   bounded retry loop that waits for a marker frame to resolve and reports
//!   every failed lookup.

pub mod acquisition;
pub mod transform;

pub use acquisition::{AcquiredMarker, AcquisitionPolicy, LookupAttempt, acquire_marker};
pub use transform::{
    Quaternion, StampedTransform, TfBuffer, Transform3D, TransformError, TransformSource, Vec3,
};
