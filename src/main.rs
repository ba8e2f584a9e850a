//! Faultline CLI entry point.
//!
//! Inspects and exercises a deployment's failure pipeline: `check` and
//! `status` report on configuration and the alert budget, `mask` explains a
//! reporting mask, `test-alert` sends a real alert and `simulate` drives the
//! whole pipeline in-process.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};

use faultline::config::{
    debug_mode, default_config_path, env_path_for, load_config, load_secrets, FaultlineConfig,
};
use faultline::dispatcher::{AlertOptions, RequestContext};
use faultline::exception::{Category, UnifiedException};
use faultline::limiter::FileRateLimiter;
use faultline::logging::LoggingGuard;
use faultline::pipeline::Faultline;
use faultline::runtime::RawFault;
use faultline::session::is_writable_dir;
use faultline::severity::{Severity, SeverityMask};

/// Faultline: failure interception and rate-limited alert mail.
#[derive(Parser)]
#[command(name = "faultline", version, about)]
struct Cli {
    /// Config file. Defaults to `<config dir>/faultline/faultline.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Validate configuration and directory health.
    Check,
    /// Show how much of the alert budget is used.
    Status,
    /// Describe a reporting mask (the configured one if no names are given).
    Mask {
        /// Severity names, or ALL.
        names: Vec<String>,
    },
    /// Send a test alert to the maintainers.
    TestAlert {
        /// Bypass the rate limiter.
        #[arg(long)]
        no_limit: bool,
        /// Reply-To value, `Name <addr>` or a bare address.
        #[arg(long)]
        reply_to: Option<String>,
        /// Report text.
        #[arg(long, default_value = "This is a test alert from faultline.")]
        message: String,
    },
    /// Drive the pipeline with a synthetic failure.
    Simulate {
        /// Kind of failure.
        #[arg(value_enum)]
        kind: SimulatedFailure,
        /// Also write JSON diagnostics under this directory, as a host would.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

/// Synthetic failures for `simulate`.
#[derive(Clone, Copy, ValueEnum)]
enum SimulatedFailure {
    /// A reportable WARNING fault raised as an exception.
    Warning,
    /// A panic inside request work.
    Panic,
    /// An undeliverable ERROR fault left for the shutdown monitor.
    Fatal,
    /// An application exception returned from request work.
    Error,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = match &cli.command {
        Command::Simulate {
            log_dir: Some(dir), ..
        } => Some(faultline::logging::init_production(dir)?),
        _ => {
            faultline::logging::init_cli();
            None
        }
    };

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Command::Check => handle_check(&config_path),
        Command::Status => handle_status(&config_path),
        Command::Mask { names } => handle_mask(&config_path, &names),
        Command::TestAlert {
            no_limit,
            reply_to,
            message,
        } => handle_test_alert(&config_path, no_limit, reply_to, &message),
        Command::Simulate { kind, .. } => handle_simulate(&config_path, kind, logging),
    }
}

/// Load the config, falling back to defaults when the file is absent.
fn load_or_default(path: &Path) -> anyhow::Result<FaultlineConfig> {
    if path.exists() {
        return load_config(path);
    }
    debug!(path = %path.display(), "config file not found, using defaults");
    Ok(FaultlineConfig::default())
}

fn build_pipeline(config_path: &Path) -> anyhow::Result<Faultline> {
    let config = load_or_default(config_path)?;
    let secrets = load_secrets(&env_path_for(config_path))?;
    Faultline::from_config(&config, &secrets, RequestContext::from_env())
}

fn handle_check(config_path: &Path) -> anyhow::Result<()> {
    let mut problems: usize = 0;
    let mut report = |ok: bool, line: String| {
        let tag = if ok { "ok" } else { "FAIL" };
        println!("[{tag:>4}] {line}");
        if !ok {
            problems = problems.saturating_add(1);
        }
    };

    report(
        config_path.exists(),
        format!("config file {}", config_path.display()),
    );
    let config = load_or_default(config_path)?;
    let secrets = load_secrets(&env_path_for(config_path))?;

    let log_dir = &config.paths.log_dir;
    report(
        is_writable_dir(log_dir),
        format!("log directory {} is writable", log_dir.display()),
    );

    let marker_dir = config.paths.rate_limit_dir();
    let marker_ok = !marker_dir.exists() || is_writable_dir(&marker_dir);
    report(
        marker_ok,
        format!("rate limit directory {} is usable", marker_dir.display()),
    );

    let recipient = secrets.mail_devs.as_ref().or(config.mail.recipient.as_ref());
    report(
        recipient.is_some(),
        match recipient {
            Some(address) => format!("alerts go to {address}"),
            None => "no maintainer address (MAIL_DEVS) configured".to_owned(),
        },
    );

    let sendmail = &config.mail.sendmail_path;
    report(
        sendmail.is_file(),
        format!("mail transport {}", sendmail.display()),
    );

    let mask = config.reporting.severity_mask()?;
    println!("reporting mask: {}", mask.enabled_names().join(", "));
    println!("debug mode: {}", debug_mode(&config, &secrets));

    if problems > 0 {
        anyhow::bail!("{problems} check(s) failed");
    }
    info!("configuration looks healthy");
    Ok(())
}

fn handle_status(config_path: &Path) -> anyhow::Result<()> {
    let config = load_or_default(config_path)?;
    let limiter = FileRateLimiter::new(config.paths.rate_limit_dir())
        .with_max_alerts(config.rate_limit.max_alerts)
        .with_window(config.rate_limit.window());

    let used = limiter
        .active_markers()
        .context("failed to read rate limiter state")?;
    println!(
        "alerts sent in the last {} hours: {used}/{}",
        config.rate_limit.window_hours,
        limiter.max_alerts()
    );
    if used >= limiter.max_alerts() {
        println!("alerts are currently suppressed");
    }
    Ok(())
}

fn handle_mask(config_path: &Path, names: &[String]) -> anyhow::Result<()> {
    let mask = if names.is_empty() {
        load_or_default(config_path)?.reporting.severity_mask()?
    } else {
        SeverityMask::from_names(names)?
    };
    println!("bits: {:#06x}", mask.bits());
    println!("{}", mask.describe());
    Ok(())
}

fn handle_test_alert(
    config_path: &Path,
    no_limit: bool,
    reply_to: Option<String>,
    message: &str,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config_path)?;

    let mut options = AlertOptions::default().with_reason("faultline test alert");
    options.rate_limited = !no_limit;
    if let Some(reply_to) = reply_to {
        options = options.with_reply_to(reply_to);
    }

    if !pipeline.alert(message, &options) {
        if let Some(path) = pipeline.session().path() {
            warn!(session = %path.display(), "see session log for details");
        }
        anyhow::bail!("test alert was not sent");
    }
    println!("test alert sent");
    Ok(())
}

fn handle_simulate(
    config_path: &Path,
    kind: SimulatedFailure,
    logging: Option<LoggingGuard>,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config_path)?;
    pipeline.install();
    let _shutdown = match logging {
        Some(logging) => pipeline.shutdown_guard().with_logging(logging),
        None => pipeline.shutdown_guard(),
    };

    match kind {
        SimulatedFailure::Warning => {
            pipeline.run(|| {
                pipeline.fault(RawFault::new(
                    Severity::WARNING,
                    "division by zero",
                    "calc.x",
                    42,
                ))?;
                Ok(())
            });
        }
        SimulatedFailure::Panic => {
            pipeline.run(|| -> Result<(), UnifiedException> { panic!("simulated panic") });
        }
        SimulatedFailure::Fatal => {
            pipeline.fault(RawFault::new(
                Severity::ERROR,
                "simulated fatal error",
                file!(),
                line!(),
            ))?;
        }
        SimulatedFailure::Error => {
            pipeline.run(|| -> Result<(), UnifiedException> {
                Err(UnifiedException::new(
                    Category::Temporary,
                    "simulated application failure",
                ))
            });
        }
    }

    if let Some(path) = pipeline.session().path() {
        info!(session = %path.display(), "simulation logged");
    }
    Ok(())
}
