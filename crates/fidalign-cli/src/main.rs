//! `fidalign` – marker-relative base alignment.
//!
//! Waits for a fiducial marker to show up in the transform tree, then drives
//! the mobile base to a standoff point in front of it with a
//! rotate/translate/rotate sequence.
//!
//! 1. Loads `~/.fidalign/config.toml` (defaults when absent), then applies
//!    `FIDALIGN_*` environment overrides and command-line flags.
//! 2. Connects to the selected backend: a robot behind `rosbridge_server`, or
//!    the in-process simulation.
//! 3. Runs one [`AlignmentSession`] and exits with a status code describing
//!    the outcome.
//!
//! Ctrl-C stops the run before the next goal is sent; a goal already in
//! flight is left to finish.

mod config;
mod sim;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use fidalign_hal::SimTrajectoryServer;
use fidalign_middleware::{RosbridgeConnection, RosbridgeTrajectoryClient};
use fidalign_perception::TfBuffer;
use fidalign_runtime::session::wait_for_shutdown;
use fidalign_runtime::{AlignmentSession, SessionOutcome, init_tracing};
use fidalign_types::{AlignError, ShutdownSignal};
use serde_json::json;
use tracing::{info, warn};

use crate::config::{Backend, Config};
use crate::sim::SimWorld;

// ─────────────────────────────────────────────────────────────────────────────
// Exit codes
// ─────────────────────────────────────────────────────────────────────────────

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn exit_code(result: &Result<SessionOutcome, AlignError>) -> i32 {
    match result {
        Ok(_) => EXIT_OK,
        Err(AlignError::Interrupted) => EXIT_INTERRUPTED,
        Err(AlignError::Config(_)) => EXIT_CONFIG,
        Err(_) => EXIT_FAILURE,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

/// Flags given on the command line.  They take precedence over the config
/// file and the environment.
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    marker: Option<String>,
    offset: Option<f64>,
    backend: Option<Backend>,
    json: bool,
    init_config: bool,
    help: bool,
}

fn parse_args<I>(args: I) -> Result<CliArgs, AlignError>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| AlignError::Config(format!("{flag} needs a value")))
        };
        match arg.as_str() {
            "-m" | "--marker" => parsed.marker = Some(value("--marker")?),
            "-o" | "--offset" => {
                let raw = value("--offset")?;
                let offset = raw
                    .parse::<f64>()
                    .map_err(|_| AlignError::Config(format!("invalid --offset '{raw}'")))?;
                parsed.offset = Some(offset);
            }
            "-b" | "--backend" => parsed.backend = Some(value("--backend")?.parse()?),
            "--sim" => parsed.backend = Some(Backend::Sim),
            "--json" => parsed.json = true,
            "--init-config" => parsed.init_config = true,
            "-h" | "--help" => parsed.help = true,
            other => return Err(AlignError::Config(format!("unknown argument '{other}'"))),
        }
    }
    Ok(parsed)
}

impl CliArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(marker) = &self.marker {
            cfg.marker_name = marker.clone();
        }
        if let Some(offset) = self.offset {
            cfg.offset_m = offset;
        }
        if let Some(backend) = self.backend {
            cfg.backend = backend;
        }
    }
}

fn load_config(args: &CliArgs) -> Result<Config, AlignError> {
    let mut cfg = match config::load()? {
        Some(cfg) => {
            info!(path = %config::config_path().display(), "config loaded");
            cfg
        }
        None => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    args.apply(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    // Tracing first: the runtime below is built afterwards.
    let guard = init_tracing("fidalign");

    let code = run_cli(std::env::args().skip(1));

    drop(guard);
    std::process::exit(code);
}

fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let args = match parse_args(args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {e}", "Error".red().bold());
            print_usage();
            return EXIT_CONFIG;
        }
    };
    if args.help {
        print_usage();
        return EXIT_OK;
    }

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping before the next motion …"
                .yellow()
                .bold()
        );
        handler_signal.trigger();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; interrupts will kill the process");
    }

    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red().bold());
            return EXIT_CONFIG;
        }
    };

    if args.init_config {
        return match config::save(&cfg) {
            Ok(()) => {
                println!(
                    "  {} Config saved to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                );
                EXIT_OK
            }
            Err(e) => {
                eprintln!("{}: {e}", "Error saving config".red());
                EXIT_CONFIG
            }
        };
    }

    println!(
        "  Aligning to {} at {} m via {}\n",
        cfg.marker_name.bold(),
        cfg.offset_m,
        cfg.backend.to_string().cyan()
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start async runtime: {e}", "Error".red().bold());
            return EXIT_FAILURE;
        }
    };

    let result = runtime.block_on(align(&cfg, shutdown));
    print_outcome(&result, args.json);
    exit_code(&result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────────────────────────────────────

async fn align(cfg: &Config, shutdown: ShutdownSignal) -> Result<SessionOutcome, AlignError> {
    match cfg.backend {
        Backend::Sim => align_sim(cfg, shutdown).await,
        Backend::Rosbridge => align_rosbridge(cfg, shutdown).await,
    }
}

async fn align_sim(cfg: &Config, shutdown: ShutdownSignal) -> Result<SessionOutcome, AlignError> {
    let tf = TfBuffer::new();
    let server = SimTrajectoryServer::new().with_action_name(&cfg.trajectory_action);
    let publisher = SimWorld::new(
        tf.clone(),
        server.clone(),
        cfg.sim_marker,
        &cfg.base_frame,
        &cfg.marker_name,
    )
    .spawn();

    let session = AlignmentSession::new(
        Arc::new(tf),
        Arc::new(server.clone()),
        cfg.session_config(),
        shutdown,
    );
    let result = session.run().await;
    publisher.abort();

    let pose = server.pose();
    info!(x = pose.x, y = pose.y, heading = pose.heading, "simulated base pose");
    result
}

async fn align_rosbridge(
    cfg: &Config,
    shutdown: ShutdownSignal,
) -> Result<SessionOutcome, AlignError> {
    let tf = TfBuffer::new();
    let connect = RosbridgeConnection::connect(
        &cfg.rosbridge_url,
        tf.clone(),
        Duration::from_secs_f64(cfg.server_timeout_secs),
    );
    let connection = tokio::select! {
        conn = connect => conn?,
        () = wait_for_shutdown(&shutdown) => return Err(AlignError::Interrupted),
    };
    connection.subscribe_tf()?;

    let client = RosbridgeTrajectoryClient::new(Arc::new(connection), &cfg.trajectory_action);
    AlignmentSession::new(
        Arc::new(tf),
        Arc::new(client),
        cfg.session_config(),
        shutdown,
    )
    .run()
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_outcome(result: &Result<SessionOutcome, AlignError>, as_json: bool) {
    if as_json {
        let value = match result {
            Ok(outcome) => json!({
                "ok": true,
                "correction": outcome.correction,
                "report": outcome.report,
                "lookup_attempts": outcome.lookup_attempts.len(),
                "acquisition_secs": outcome.acquisition_elapsed.as_secs_f64(),
            }),
            Err(e) => json!({ "ok": false, "error": e, "message": e.to_string() }),
        };
        println!("{value}");
        return;
    }

    println!();
    match result {
        Ok(outcome) if outcome.report.all_succeeded() => {
            println!("  {} Aligned with the marker.", "✓".green().bold());
        }
        Ok(outcome) => {
            println!(
                "  {} Alignment finished, but some steps did not succeed:",
                "!".yellow().bold()
            );
            for step in &outcome.report.steps {
                if !step.status.is_success() {
                    println!("    • {} – {}", step.step, step.status.to_string().yellow());
                }
            }
        }
        Err(AlignError::Interrupted) => {
            println!("  {} Interrupted by operator.", "✗".yellow().bold());
        }
        Err(e) => {
            println!("  {} {e}", "✗".red().bold());
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ┌─┐┬┌┬┐┌─┐┬  ┬┌─┐┌┐┌".bold().cyan());
    println!("{}", "  ├┤ │ ││├─┤│  ││ ┬│││".bold().cyan());
    println!("{}", "  └  ┴─┴┘┴ ┴┴─┘┴└─┘┘└┘".bold().cyan());
    println!(
        "  {} {}",
        "fidalign".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Marker-relative base alignment");
    println!();
}

fn print_usage() {
    println!("Usage: fidalign [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -m, --marker <NAME>     marker frame to align to");
    println!("  -o, --offset <METRES>   standoff distance from the marker");
    println!("  -b, --backend <NAME>    'rosbridge' or 'sim'");
    println!("      --sim               shorthand for --backend sim");
    println!("      --json              print the outcome as JSON");
    println!("      --init-config       write the effective config to ~/.fidalign/config.toml");
    println!("  -h, --help              show this help");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidalign_runtime::{AlignmentReport, Correction};

    fn args(list: &[&str]) -> Result<CliArgs, AlignError> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        let parsed = args(&["--marker", "shelf", "-o", "0.5", "--sim", "--json"]).unwrap();
        assert_eq!(parsed.marker.as_deref(), Some("shelf"));
        assert_eq!(parsed.offset, Some(0.5));
        assert_eq!(parsed.backend, Some(Backend::Sim));
        assert!(parsed.json);
        assert!(!parsed.init_config);
    }

    #[test]
    fn rejects_bad_flags() {
        assert!(matches!(args(&["--offset", "near"]), Err(AlignError::Config(_))));
        assert!(matches!(args(&["--marker"]), Err(AlignError::Config(_))));
        assert!(matches!(args(&["--backend", "ros1"]), Err(AlignError::Config(_))));
        assert!(matches!(args(&["align"]), Err(AlignError::Config(_))));
    }

    #[test]
    fn flags_override_config() {
        let mut cfg = Config::default();
        args(&["-m", "dock", "-b", "sim"]).unwrap().apply(&mut cfg);
        assert_eq!(cfg.marker_name, "dock");
        assert_eq!(cfg.backend, Backend::Sim);
        assert_eq!(cfg.offset_m, 0.75);
    }

    #[test]
    fn exit_codes() {
        let ok = Ok(SessionOutcome {
            correction: Correction {
                phi: 0.0,
                dist: 0.0,
                theta: 0.0,
            },
            report: AlignmentReport::default(),
            lookup_attempts: vec![],
            acquisition_elapsed: Duration::ZERO,
        });
        assert_eq!(exit_code(&ok), 0);
        assert_eq!(exit_code(&Err(AlignError::Interrupted)), 130);
        assert_eq!(exit_code(&Err(AlignError::Config("x".into()))), 2);
        assert_eq!(
            exit_code(&Err(AlignError::AcquisitionTimeout {
                marker_frame: "bowl".into(),
                elapsed_secs: 121.0,
                attempts: vec![],
            })),
            1
        );
        assert_eq!(exit_code(&Err(AlignError::Transport("gone".into()))), 1);
    }

    #[tokio::test]
    async fn sim_backend_aligns_end_to_end() {
        let cfg = Config {
            backend: Backend::Sim,
            step_duration_secs: 0.01,
            ..Config::default()
        };
        let outcome = align(&cfg, ShutdownSignal::new()).await.unwrap();
        assert!(outcome.report.all_succeeded());
        assert_eq!(outcome.report.steps.len(), 3);
    }
}
