//! Marker acquisition loop.
//!
//! Polls a [`TransformSource`] for the pose of a named marker frame in the
//! robot base frame until it resolves or the [`AcquisitionPolicy`] timeout
//! elapses.  Every failed poll is recorded as a [`LookupAttempt`] so the
//! caller can report exactly what went wrong.
//!
//! Waiting uses [`tokio::time`], which lets listener tasks keep filling the
//! transform buffer between polls and lets tests drive the loop on a paused
//! clock.

use std::fmt;
use std::time::Duration;

use fidalign_types::{AlignError, ShutdownSignal};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::transform::{StampedTransform, TransformSource};

/// Default overall acquisition timeout.
pub const DEFAULT_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default pause between two lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Retry policy for [`acquire_marker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionPolicy {
    /// Give up once this much time has elapsed without a resolved marker.
    pub timeout: Duration,
    /// Pause between consecutive lookups.
    pub poll_interval: Duration,
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ACQUISITION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AcquisitionPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Upper bound on the number of lookups one acquisition can make.
    ///
    /// Lookups happen at `k · poll_interval` and the loop stops at the first
    /// one past `timeout`, hence `⌊timeout / poll_interval⌋ + 2`.
    pub fn max_attempts(&self) -> u64 {
        if self.poll_interval.is_zero() {
            return u64::MAX;
        }
        (self.timeout.as_secs_f64() / self.poll_interval.as_secs_f64()).floor() as u64 + 2
    }
}

/// One failed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupAttempt {
    /// The transform tree could not connect the two frames yet.
    FrameUnavailable { target: String, source: String },
    /// The lookup itself failed with an error.
    LookupError(String),
}

impl fmt::Display for LookupAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupAttempt::FrameUnavailable { target, source } => write!(f, "{target} → {source}"),
            LookupAttempt::LookupError(message) => write!(f, "exception: {message}"),
        }
    }
}

/// A resolved marker pose together with the history of the search.
#[derive(Debug, Clone)]
pub struct AcquiredMarker {
    /// Pose of the marker in the base frame.
    pub transform: StampedTransform,
    /// Lookups that failed before the successful one.
    pub attempts: Vec<LookupAttempt>,
    /// Time spent searching.
    pub elapsed: Duration,
}

/// Wait for `marker_frame` to become resolvable in `base_frame`.
///
/// The loop returns on the first successful lookup.  A lookup that reports an
/// error is logged, recorded, and retried like a missing frame.  The overall
/// timeout is checked after every failed lookup, so the loop always ends
/// within `timeout + poll_interval`.
///
/// # Errors
///
/// * [`AlignError::AcquisitionTimeout`] – the marker did not resolve in time;
///   carries one entry per failed lookup.
/// * [`AlignError::Interrupted`] – `shutdown` was triggered between polls.
#[instrument(skip(source, policy, shutdown), fields(timeout_secs = policy.timeout.as_secs_f64()))]
pub async fn acquire_marker<S>(
    source: &S,
    base_frame: &str,
    marker_frame: &str,
    policy: &AcquisitionPolicy,
    shutdown: &ShutdownSignal,
) -> Result<AcquiredMarker, AlignError>
where
    S: TransformSource + ?Sized,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts();
    let mut attempts: Vec<LookupAttempt> = Vec::new();

    info!("waiting for transform {base_frame} → {marker_frame}");

    loop {
        if shutdown.is_triggered() {
            warn!(attempts = attempts.len(), "marker acquisition interrupted");
            return Err(AlignError::Interrupted);
        }

        debug!("looking up transform from {base_frame} to {marker_frame}");
        if source.can_transform(base_frame, marker_frame) {
            match source.lookup_transform(base_frame, marker_frame) {
                Ok(transform) => {
                    let elapsed = start.elapsed();
                    info!(
                        attempts = attempts.len(),
                        elapsed_secs = elapsed.as_secs_f64(),
                        "found marker '{marker_frame}'"
                    );
                    warn!("the robot will now move");
                    return Ok(AcquiredMarker {
                        transform,
                        attempts,
                        elapsed,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "error during transform lookup");
                    attempts.push(LookupAttempt::LookupError(e.to_string()));
                }
            }
        } else {
            attempts.push(LookupAttempt::FrameUnavailable {
                target: base_frame.to_string(),
                source: marker_frame.to_string(),
            });
        }

        warn!(
            marker_frame,
            attempt = attempts.len(),
            "could not detect the marker; point the camera at it and make sure it is upright \
             (a wrong orientation results in a wrong movement). The robot will move once the \
             marker is found"
        );

        let elapsed = start.elapsed();
        if elapsed > policy.timeout || attempts.len() as u64 >= max_attempts {
            let attempts: Vec<String> = attempts.iter().map(ToString::to_string).collect();
            error!(
                marker_frame,
                elapsed_secs = elapsed.as_secs_f64(),
                attempts = attempts.len(),
                "timeout waiting for transforms: {}",
                attempts.join(", ")
            );
            return Err(AlignError::AcquisitionTimeout {
                marker_frame: marker_frame.to_string(),
                elapsed_secs: elapsed.as_secs_f64(),
                attempts,
            });
        }

        tokio::time::sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Quaternion, TransformError, Transform3D, Vec3};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn marker_pose() -> StampedTransform {
        StampedTransform::new(
            "base_link",
            "bowl",
            Utc::now(),
            Transform3D::new(Vec3::new(1.0, 0.5, 0.0), Quaternion::identity()),
        )
    }

    /// Reports the frame as missing for the first `misses` polls.
    struct LateMarker {
        misses: usize,
        polls: AtomicUsize,
    }

    impl LateMarker {
        fn new(misses: usize) -> Self {
            Self {
                misses,
                polls: AtomicUsize::new(0),
            }
        }
    }

    impl TransformSource for LateMarker {
        fn can_transform(&self, _target: &str, _source: &str) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) >= self.misses
        }

        fn lookup_transform(
            &self,
            _target: &str,
            _source: &str,
        ) -> Result<StampedTransform, TransformError> {
            Ok(marker_pose())
        }
    }

    /// Claims the frame is resolvable but fails the first `failures` lookups.
    struct FlakyLookup {
        failures: usize,
        lookups: AtomicUsize,
    }

    impl TransformSource for FlakyLookup {
        fn can_transform(&self, _target: &str, _source: &str) -> bool {
            true
        }

        fn lookup_transform(
            &self,
            target: &str,
            source: &str,
        ) -> Result<StampedTransform, TransformError> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(TransformError::Stale {
                    target: target.to_string(),
                    source_frame: source.to_string(),
                    cache_secs: 10.0,
                })
            } else {
                Ok(marker_pose())
            }
        }
    }

    struct NeverVisible;

    impl TransformSource for NeverVisible {
        fn can_transform(&self, _target: &str, _source: &str) -> bool {
            false
        }

        fn lookup_transform(
            &self,
            _target: &str,
            source: &str,
        ) -> Result<StampedTransform, TransformError> {
            Err(TransformError::UnknownFrame(source.to_string()))
        }
    }

    #[test]
    fn max_attempts_covers_timeout_plus_one_interval() {
        let policy = AcquisitionPolicy::default();
        assert_eq!(policy.max_attempts(), 122);
        let policy = AcquisitionPolicy::new(Duration::from_millis(2500), Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 4);
        let policy = AcquisitionPolicy::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(policy.max_attempts(), u64::MAX);
    }

    #[test]
    fn lookup_attempt_display() {
        let missing = LookupAttempt::FrameUnavailable {
            target: "base_link".to_string(),
            source: "bowl".to_string(),
        };
        assert_eq!(missing.to_string(), "base_link → bowl");
        let failed = LookupAttempt::LookupError("boom".to_string());
        assert_eq!(failed.to_string(), "exception: boom");
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_success_has_empty_attempt_log() {
        let source = LateMarker::new(0);
        let found = acquire_marker(
            &source,
            "base_link",
            "bowl",
            &AcquisitionPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await
        .unwrap();
        assert!(found.attempts.is_empty());
        assert_eq!(found.elapsed, Duration::ZERO);
        assert_eq!(found.transform.child_frame_id, "bowl");
    }

    #[tokio::test(start_paused = true)]
    async fn returns_after_n_misses_with_n_attempts() {
        let source = LateMarker::new(3);
        let found = acquire_marker(
            &source,
            "base_link",
            "bowl",
            &AcquisitionPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await
        .unwrap();

        assert_eq!(found.attempts.len(), 3);
        assert!(found.attempts.iter().all(|a| matches!(a, LookupAttempt::FrameUnavailable { .. })));
        assert!(found.elapsed >= Duration::from_secs(3));
        assert!(found.elapsed < Duration::from_secs(4));
        assert!((found.transform.transform.translation.x - 1.0).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_errors_are_retried_not_fatal() {
        let source = FlakyLookup {
            failures: 2,
            lookups: AtomicUsize::new(0),
        };
        let found = acquire_marker(
            &source,
            "base_link",
            "bowl",
            &AcquisitionPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await
        .unwrap();

        assert_eq!(found.attempts.len(), 2);
        for attempt in &found.attempts {
            match attempt {
                LookupAttempt::LookupError(msg) => assert!(msg.contains("older than")),
                other => panic!("expected lookup error, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_timeout_plus_interval() {
        let policy = AcquisitionPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        let start = Instant::now();
        let err = acquire_marker(
            &NeverVisible,
            "base_link",
            "bowl",
            &policy,
            &ShutdownSignal::new(),
        )
        .await
        .unwrap_err();
        let waited = start.elapsed();

        assert!(waited <= policy.timeout + policy.poll_interval, "waited {waited:?}");
        match err {
            AlignError::AcquisitionTimeout {
                marker_frame,
                elapsed_secs,
                attempts,
            } => {
                assert_eq!(marker_frame, "bowl");
                assert!(elapsed_secs > 5.0);
                assert_eq!(attempts.len() as u64, policy.max_attempts());
                assert!(attempts.iter().all(|a| a == "base_link → bowl"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_still_polls_once() {
        let policy = AcquisitionPolicy::new(Duration::ZERO, Duration::from_secs(1));
        let err = acquire_marker(
            &NeverVisible,
            "base_link",
            "bowl",
            &policy,
            &ShutdownSignal::new(),
        )
        .await
        .unwrap_err();
        match err {
            AlignError::AcquisitionTimeout { attempts, .. } => assert_eq!(attempts.len(), 2),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_search() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let err = acquire_marker(
            &NeverVisible,
            "base_link",
            "bowl",
            &AcquisitionPolicy::default(),
            &shutdown,
        )
        .await
        .unwrap_err();
        assert_eq!(err, AlignError::Interrupted);
    }

    /// Triggers the shutdown signal from inside the poll, like a Ctrl-C
    /// arriving while the operator is still aiming the camera.
    struct InterruptAfter {
        polls: AtomicUsize,
        after: usize,
        shutdown: ShutdownSignal,
    }

    impl TransformSource for InterruptAfter {
        fn can_transform(&self, _target: &str, _source: &str) -> bool {
            if self.polls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.shutdown.trigger();
            }
            false
        }

        fn lookup_transform(
            &self,
            _target: &str,
            source: &str,
        ) -> Result<StampedTransform, TransformError> {
            Err(TransformError::UnknownFrame(source.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_between_polls_is_honoured() {
        let shutdown = ShutdownSignal::new();
        let source = InterruptAfter {
            polls: AtomicUsize::new(0),
            after: 2,
            shutdown: shutdown.clone(),
        };
        let err = acquire_marker(
            &source,
            "base_link",
            "bowl",
            &AcquisitionPolicy::default(),
            &shutdown,
        )
        .await
        .unwrap_err();
        assert_eq!(err, AlignError::Interrupted);
        assert_eq!(source.polls.load(Ordering::SeqCst), 2);
    }
}
