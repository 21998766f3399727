//! [`AlignmentSession`] – one complete alignment run.
//!
//! 1. **Acquire** – poll the [`TransformSource`] until the marker frame
//!    resolves in the base frame ([`acquire_marker`]).
//! 2. **Connect** – wait for the trajectory action server.
//! 3. **Compute** – turn the marker pose into a [`Correction`].
//! 4. **Move** – run the three steps through the [`MotionSequencer`].
//!
//! The trajectory client is shut down on every exit path, including
//! acquisition timeouts and operator interrupts.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fidalign_hal::SimTrajectoryServer;
//! use fidalign_perception::TfBuffer;
//! use fidalign_runtime::session::{AlignmentSession, SessionConfig};
//! use fidalign_types::ShutdownSignal;
//!
//! # async fn run() {
//! let session = AlignmentSession::new(
//!     Arc::new(TfBuffer::new()),
//!     Arc::new(SimTrajectoryServer::new()),
//!     SessionConfig::default(),
//!     ShutdownSignal::new(),
//! );
//! let outcome = session.run().await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use fidalign_hal::TrajectoryClient;
use fidalign_perception::{AcquisitionPolicy, LookupAttempt, TransformSource, acquire_marker};
use fidalign_types::{AlignError, ShutdownSignal};
use tracing::{error, info, warn};

use crate::correction::{Correction, DEFAULT_OFFSET_M, compute_correction};
use crate::sequencer::{AlignmentReport, DEFAULT_STEP_DURATION, MotionSequencer};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// How long to wait for the trajectory action server.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(60);

/// How often blocking waits re-check the [`ShutdownSignal`].
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves once `shutdown` has been triggered.  Race it against a long wait
/// with `tokio::select!` to make that wait interruptible.
pub async fn wait_for_shutdown(shutdown: &ShutdownSignal) {
    while !shutdown.is_triggered() {
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
}

/// Configuration bundle for [`AlignmentSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Robot base frame the marker pose is expressed in.
    pub base_frame: String,
    /// Marker frame to align to.
    pub marker_frame: String,
    /// Standoff distance from the marker (m).
    pub offset: f64,
    pub acquisition: AcquisitionPolicy,
    pub server_timeout: Duration,
    pub step_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_frame: "base_link".to_string(),
            marker_frame: "bowl".to_string(),
            offset: DEFAULT_OFFSET_M,
            acquisition: AcquisitionPolicy::default(),
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            step_duration: DEFAULT_STEP_DURATION,
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub correction: Correction,
    pub report: AlignmentReport,
    /// Failed lookups before the marker was found.
    pub lookup_attempts: Vec<LookupAttempt>,
    pub acquisition_elapsed: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// AlignmentSession
// ─────────────────────────────────────────────────────────────────────────────

pub struct AlignmentSession {
    source: Arc<dyn TransformSource>,
    client: Arc<dyn TrajectoryClient>,
    config: SessionConfig,
    shutdown: ShutdownSignal,
}

impl AlignmentSession {
    pub fn new(
        source: Arc<dyn TransformSource>,
        client: Arc<dyn TrajectoryClient>,
        config: SessionConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source,
            client,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the alignment once, then shut the trajectory client down.
    ///
    /// # Errors
    ///
    /// Whatever stopped the run: [`AlignError::AcquisitionTimeout`],
    /// [`AlignError::ServerUnavailable`], [`AlignError::MotionRejected`],
    /// [`AlignError::Transport`] or [`AlignError::Interrupted`].  A step that
    /// merely did not succeed is not an error; see
    /// [`AlignmentReport::all_succeeded`].
    pub async fn run(&self) -> Result<SessionOutcome, AlignError> {
        let result = self.execute().await;
        if let Err(e) = &result {
            error!(error = %e, "alignment failed");
        }
        self.client.shutdown().await;
        result
    }

    async fn execute(&self) -> Result<SessionOutcome, AlignError> {
        let cfg = &self.config;

        // ── Acquire ───────────────────────────────────────────────────────────
        let marker = acquire_marker(
            self.source.as_ref(),
            &cfg.base_frame,
            &cfg.marker_frame,
            &cfg.acquisition,
            &self.shutdown,
        )
        .await?;

        // ── Connect ───────────────────────────────────────────────────────────
        info!(action = self.client.action_name(), "waiting for trajectory server");
        let server_ready = tokio::select! {
            ready = self.client.wait_for_server(cfg.server_timeout) => ready,
            () = wait_for_shutdown(&self.shutdown) => {
                warn!("interrupted while waiting for trajectory server");
                return Err(AlignError::Interrupted);
            }
        };
        if !server_ready {
            return Err(AlignError::ServerUnavailable {
                server: self.client.action_name().to_string(),
                timeout_secs: cfg.server_timeout.as_secs_f64(),
            });
        }
        if self.shutdown.is_triggered() {
            return Err(AlignError::Interrupted);
        }

        // ── Compute ───────────────────────────────────────────────────────────
        let correction = compute_correction(&marker.transform.transform, cfg.offset);
        info!(
            phi = correction.phi,
            dist = correction.dist,
            theta = correction.theta,
            offset = cfg.offset,
            "computed correction"
        );

        // ── Move ──────────────────────────────────────────────────────────────
        let report = MotionSequencer::new(Arc::clone(&self.client))
            .with_step_duration(cfg.step_duration)
            .align(&correction, &self.shutdown)
            .await?;

        if report.all_succeeded() {
            info!("alignment complete");
        } else {
            info!(failed_steps = ?report.failed_steps(), "alignment finished with failed steps");
        }

        Ok(SessionOutcome {
            correction,
            report,
            lookup_attempts: marker.attempts,
            acquisition_elapsed: marker.elapsed,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
