//! Simulated world for the `sim` backend.
//!
//! Publishes the transforms a real robot would: a static camera mount on the
//! base and a marker detection in the camera frame, recomputed from the
//! simulated base pose so the marker appears to move as the base drives.

use std::time::Duration;

use chrono::Utc;
use fidalign_hal::{SimPose, SimTrajectoryServer};
use fidalign_perception::{Quaternion, StampedTransform, TfBuffer, Transform3D, Vec3};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SimMarker;

/// Camera frame published by the simulated robot.
pub const CAMERA_FRAME: &str = "camera_color_optical_frame";

/// How often marker detections are republished.
pub const PUBLISH_PERIOD: Duration = Duration::from_millis(100);

/// Pose of the camera on the base: 0.1 m ahead, 1.2 m up.
pub fn camera_mount() -> Transform3D {
    Transform3D::new(Vec3::new(0.1, 0.0, 1.2), Quaternion::identity())
}

fn planar(x: f64, y: f64, yaw: f64) -> Transform3D {
    Transform3D::new(Vec3::new(x, y, 0.0), Quaternion::from_yaw(yaw))
}

pub struct SimWorld {
    tf: TfBuffer,
    server: SimTrajectoryServer,
    marker: SimMarker,
    base_frame: String,
    marker_frame: String,
}

impl SimWorld {
    pub fn new(
        tf: TfBuffer,
        server: SimTrajectoryServer,
        marker: SimMarker,
        base_frame: impl Into<String>,
        marker_frame: impl Into<String>,
    ) -> Self {
        let world = Self {
            tf,
            server,
            marker,
            base_frame: base_frame.into(),
            marker_frame: marker_frame.into(),
        };
        world.tf.set_transform(
            StampedTransform::new(&world.base_frame, CAMERA_FRAME, Utc::now(), camera_mount()),
            true,
        );
        world
    }

    /// Marker pose in the camera frame for the given base pose.
    pub fn marker_in_camera(&self, base: SimPose) -> Transform3D {
        let world_camera = planar(base.x, base.y, base.heading).compose(camera_mount());
        let world_marker = planar(self.marker.x, self.marker.y, self.marker.yaw_rad);
        world_camera.inverse().compose(world_marker)
    }

    /// Publish one marker detection for the current base pose.
    pub fn publish_once(&self) {
        let transform = self.marker_in_camera(self.server.pose());
        self.tf.set_transform(
            StampedTransform::new(CAMERA_FRAME, &self.marker_frame, Utc::now(), transform),
            false,
        );
    }

    /// Keep publishing until the simulated server is shut down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PUBLISH_PERIOD);
            while !self.server.is_shut_down() {
                ticker.tick().await;
                self.publish_once();
            }
            debug!("sim world stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidalign_perception::TransformSource;
    use std::f64::consts::FRAC_PI_2;

    fn world(tf: &TfBuffer, server: &SimTrajectoryServer) -> SimWorld {
        SimWorld::new(
            tf.clone(),
            server.clone(),
            SimMarker {
                x: 2.0,
                y: 1.0,
                yaw_rad: FRAC_PI_2,
            },
            "base_link",
            "bowl",
        )
    }

    #[test]
    fn marker_resolves_in_base_frame() {
        let tf = TfBuffer::new();
        let server = SimTrajectoryServer::new();
        let world = world(&tf, &server);
        assert!(!tf.can_transform("base_link", "bowl"));

        world.publish_once();
        let t = tf.lookup_transform("base_link", "bowl").unwrap().transform;
        assert!((t.translation.x - 2.0).abs() < 1e-9);
        assert!((t.translation.y - 1.0).abs() < 1e-9);
        assert!(t.translation.z.abs() < 1e-9);
        assert!((t.rotation.yaw() - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn marker_moves_with_the_base() {
        let tf = TfBuffer::new();
        let server = SimTrajectoryServer::new();
        let world = world(&tf, &server);
        let moved = SimPose {
            x: 2.0,
            y: 0.0,
            heading: FRAC_PI_2,
        };
        let relative = planar(moved.x, moved.y, moved.heading)
            .inverse()
            .compose(planar(2.0, 1.0, FRAC_PI_2));
        let seen = camera_mount().compose(world.marker_in_camera(moved));
        assert!((seen.translation.x - relative.translation.x).abs() < 1e-9);
        assert!((seen.translation.y - relative.translation.y).abs() < 1e-9);
        // Straight ahead, 1 m away, same heading as the base.
        assert!((seen.translation.x - 1.0).abs() < 1e-9);
        assert!(seen.translation.y.abs() < 1e-9);
        assert!(seen.rotation.yaw().abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn publisher_stops_with_the_server() {
        let tf = TfBuffer::new();
        let server = SimTrajectoryServer::new();
        let handle = world(&tf, &server).spawn();
        tokio::time::sleep(PUBLISH_PERIOD * 2).await;
        assert!(tf.can_transform("base_link", "bowl"));

        fidalign_hal::TrajectoryClient::shutdown(&server).await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("publisher should stop")
            .unwrap();
    }
}
