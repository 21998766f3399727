//! Transform buffer.
//!
//! Maintains a graph of named reference frames and the stamped 3-D rigid-body
//! transforms (translation + quaternion rotation) that relate them.  Given any
//! two frame names the buffer composes a chain of transforms via BFS to
//! produce the pose of one frame in the other.
//!
//! Edges are stored parent → child but may be traversed in either direction;
//! walking an edge backwards applies its inverse.  Dynamic edges expire after
//! the buffer's cache time, static edges never do.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use fidalign_perception::transform::{
//!     Quaternion, StampedTransform, TfBuffer, Transform3D, TransformSource, Vec3,
//! };
//!
//! let tf = TfBuffer::new();
//!
//! // camera is mounted 0.2 m above base_link.
//! tf.set_transform(
//!     StampedTransform::new("base_link", "camera", Utc::now(),
//!         Transform3D::new(Vec3::new(0.0, 0.0, 0.2), Quaternion::identity())),
//!     true,
//! );
//! // the marker is seen 1 m in front of the camera.
//! tf.set_transform(
//!     StampedTransform::new("camera", "bowl", Utc::now(),
//!         Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity())),
//!     false,
//! );
//!
//! let t = tf.lookup_transform("base_link", "bowl").unwrap();
//! assert!((t.transform.translation.x - 1.0).abs() < 1e-9);
//! assert!((t.transform.translation.z - 0.2).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Tolerance used by the rotation-matrix and Euler-angle conversions.
const MATRIX_EPS: f64 = f64::EPSILON * 4.0;

/// How long a dynamic transform stays valid after its stamp.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(10);

/// Row-major 4×4 homogeneous matrix.
pub type Matrix4 = [[f64; 4]; 4];

pub const IDENTITY_MATRIX: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Multiply a 4×4 matrix by a homogeneous column vector.
pub fn mat_mul_point(m: &Matrix4, p: [f64; 4]) -> [f64; 4] {
    let mut out = [0.0; 4];
    for (row, value) in m.iter().zip(out.iter_mut()) {
        *value = row[0] * p[0] + row[1] * p[1] + row[2] * p[2] + row[3] * p[3];
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A unit quaternion in ROS `(x, y, z, w)` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Pure rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw * 0.5;
        Self::new(0.0, 0.0, half.sin(), half.cos())
    }

    pub fn norm_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(v.x, v.y, v.z, 0.0);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Homogeneous rotation matrix for this quaternion.
    ///
    /// The quaternion is scaled by `sqrt(2 / |q|²)` before expansion, so a
    /// slightly denormalised input still yields a proper rotation.  A
    /// near-zero quaternion maps to the identity.
    pub fn to_matrix(self) -> Matrix4 {
        let q = [self.x, self.y, self.z, self.w];
        let nq = q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3];
        if nq < MATRIX_EPS {
            return IDENTITY_MATRIX;
        }
        let s = (2.0 / nq).sqrt();
        let q = q.map(|v| v * s);
        let o = |i: usize, j: usize| q[i] * q[j];
        [
            [1.0 - o(1, 1) - o(2, 2), o(0, 1) - o(2, 3), o(0, 2) + o(1, 3), 0.0],
            [o(0, 1) + o(2, 3), 1.0 - o(0, 0) - o(2, 2), o(1, 2) - o(0, 3), 0.0],
            [o(0, 2) - o(1, 3), o(1, 2) + o(0, 3), 1.0 - o(0, 0) - o(1, 1), 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Static-frame `xyz` Euler angles `(roll, pitch, yaw)`.
    ///
    /// At the pitch singularity (|pitch| = π/2) yaw is pinned to zero and the
    /// remaining rotation is reported as roll.
    pub fn to_euler(self) -> (f64, f64, f64) {
        let m = self.to_matrix();
        let cy = (m[0][0] * m[0][0] + m[1][0] * m[1][0]).sqrt();
        if cy > MATRIX_EPS {
            (
                m[2][1].atan2(m[2][2]),
                (-m[2][0]).atan2(cy),
                m[1][0].atan2(m[0][0]),
            )
        } else {
            ((-m[1][2]).atan2(m[1][1]), (-m[2][0]).atan2(cy), 0.0)
        }
    }

    /// Rotation about the vertical axis, in radians.
    pub fn yaw(self) -> f64 {
        self.to_euler().2
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms: if `self` = T_A_B and `other` = T_B_C, the
    /// result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// Inverse transform: T_A_B → T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(inv_rot.rotate(self.translation.neg()), inv_rot)
    }
}

/// A transform between two named frames, captured at `stamp`.
///
/// `transform` is the pose of `child_frame_id` expressed in `frame_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    pub frame_id: String,
    pub child_frame_id: String,
    pub stamp: DateTime<Utc>,
    pub transform: Transform3D,
}

impl StampedTransform {
    pub fn new(
        frame_id: impl Into<String>,
        child_frame_id: impl Into<String>,
        stamp: DateTime<Utc>,
        transform: Transform3D,
    ) -> Self {
        Self {
            frame_id: frame_id.into(),
            child_frame_id: child_frame_id.into(),
            stamp,
            transform,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lookup errors and the source trait
// ────────────────────────────────────────────────────────────────────────────

/// Why a transform could not be resolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("frame '{0}' does not exist in the transform tree")]
    UnknownFrame(String),

    #[error("no connection between '{target}' and '{source_frame}'")]
    Disconnected {
        target: String,
        source_frame: String,
    },

    #[error(
        "transform between '{target}' and '{source_frame}' is older than the {cache_secs:.1}s cache"
    )]
    Stale {
        target: String,
        source_frame: String,
        cache_secs: f64,
    },
}

/// Anything that can resolve the pose of one frame in another at the latest
/// available time.
pub trait TransformSource: Send + Sync {
    /// `true` when [`lookup_transform`][Self::lookup_transform] is expected to
    /// succeed right now.
    fn can_transform(&self, target_frame: &str, source_frame: &str) -> bool;

    /// Pose of `source_frame` expressed in `target_frame`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] when the frames are unknown, disconnected,
    /// or only joined through expired data.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
    ) -> Result<StampedTransform, TransformError>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Edge {
    stamped: StampedTransform,
    is_static: bool,
}

/// A thread-safe graph of named reference frames and the
/// [`StampedTransform`]s that relate them.
///
/// Clones share the same underlying graph, so one clone can be handed to a
/// listener task while another serves lookups.
#[derive(Debug, Clone)]
pub struct TfBuffer {
    /// `edges[parent][child] = Edge`
    edges: Arc<RwLock<HashMap<String, HashMap<String, Edge>>>>,
    cache_time: Duration,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::with_cache_time(DEFAULT_CACHE_TIME)
    }
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_time(cache_time: Duration) -> Self {
        Self {
            edges: Arc::new(RwLock::new(HashMap::new())),
            cache_time,
        }
    }

    pub fn cache_time(&self) -> Duration {
        self.cache_time
    }

    /// Register or update the transform `frame_id → child_frame_id`.
    ///
    /// Static transforms (e.g. fixed sensor mounts) never expire.
    pub fn set_transform(&self, stamped: StampedTransform, is_static: bool) {
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        edges
            .entry(stamped.frame_id.clone())
            .or_default()
            .insert(stamped.child_frame_id.clone(), Edge { stamped, is_static });
    }

    /// Names of every frame currently known to the buffer.
    pub fn frames(&self) -> Vec<String> {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        let mut names: HashSet<String> = HashSet::new();
        for (parent, children) in edges.iter() {
            names.insert(parent.clone());
            names.extend(children.keys().cloned());
        }
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names
    }

    /// Resolve the pose of `source_frame` in `target_frame`, treating dynamic
    /// edges stamped before `now - cache_time` as absent.
    ///
    /// # Errors
    ///
    /// See [`TransformError`].
    pub fn lookup_transform_at(
        &self,
        target_frame: &str,
        source_frame: &str,
        now: DateTime<Utc>,
    ) -> Result<StampedTransform, TransformError> {
        if target_frame == source_frame {
            return Ok(StampedTransform::new(
                target_frame,
                source_frame,
                now,
                Transform3D::identity(),
            ));
        }

        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        for frame in [target_frame, source_frame] {
            let known = edges.contains_key(frame)
                || edges.values().any(|children| children.contains_key(frame));
            if !known {
                return Err(TransformError::UnknownFrame(frame.to_string()));
            }
        }

        let expired = |edge: &Edge| {
            !edge.is_static
                && now
                    .signed_duration_since(edge.stamped.stamp)
                    .to_std()
                    .is_ok_and(|age| age > self.cache_time)
        };

        // BFS from the target frame; each queue item carries the accumulated
        // T_target_current and the oldest dynamic stamp seen on the way.
        let mut queue: VecDeque<(String, Transform3D, Option<DateTime<Utc>>)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut skipped_stale = false;

        queue.push_back((target_frame.to_string(), Transform3D::identity(), None));
        visited.insert(target_frame.to_string());

        while let Some((current, accumulated, oldest)) = queue.pop_front() {
            let mut neighbours: Vec<(String, Transform3D, &Edge)> = Vec::new();
            if let Some(children) = edges.get(&current) {
                for (child, edge) in children {
                    neighbours.push((child.clone(), edge.stamped.transform, edge));
                }
            }
            for (parent, children) in edges.iter() {
                if let Some(edge) = children.get(&current) {
                    neighbours.push((parent.clone(), edge.stamped.transform.inverse(), edge));
                }
            }

            for (next, step, edge) in neighbours {
                if visited.contains(&next) {
                    continue;
                }
                if expired(edge) {
                    skipped_stale = true;
                    continue;
                }
                let composed = accumulated.compose(step);
                let oldest = if edge.is_static {
                    oldest
                } else {
                    Some(oldest.map_or(edge.stamped.stamp, |o| o.min(edge.stamped.stamp)))
                };
                if next == source_frame {
                    let stamp = oldest.unwrap_or(edge.stamped.stamp);
                    return Ok(StampedTransform::new(
                        target_frame,
                        source_frame,
                        stamp,
                        composed,
                    ));
                }
                visited.insert(next.clone());
                queue.push_back((next, composed, oldest));
            }
        }

        if skipped_stale {
            Err(TransformError::Stale {
                target: target_frame.to_string(),
                source_frame: source_frame.to_string(),
                cache_secs: self.cache_time.as_secs_f64(),
            })
        } else {
            Err(TransformError::Disconnected {
                target: target_frame.to_string(),
                source_frame: source_frame.to_string(),
            })
        }
    }
}

impl TransformSource for TfBuffer {
    fn can_transform(&self, target_frame: &str, source_frame: &str) -> bool {
        self.lookup_transform_at(target_frame, source_frame, Utc::now())
            .is_ok()
    }

    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
    ) -> Result<StampedTransform, TransformError> {
        self.lookup_transform_at(target_frame, source_frame, Utc::now())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
