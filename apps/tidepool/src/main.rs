use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use route_bus::{LocalRouteBus, RouteBus, RouteStatus};
use serde_json::json;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tidepool_core::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use tidepool_core::transport::ScriptedTransport;
use tidepool_core::tree::flatten;
use tidepool_core::{SessionConfig, SessionError, SessionHost, SyncSession, ViewState};
use tracing::{debug, info};

const SETTLE_POLL: Duration = Duration::from_millis(5);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let outcome = match logctl::init(&LogConfig::from(&cli.log)) {
        Ok(()) => match cli.command {
            Command::Replay(args) => handle_replay(args).await,
        },
        Err(err) => Err(CliError::Logging(err.to_string())),
    };
    if let Err(err) = outcome {
        eprintln!("tidepool: {err}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tidepool",
    about = "Drive a remote-rendered panel session headlessly",
    version
)]
struct Cli {
    #[command(flatten)]
    log: LogFlags,

    #[command(subcommand)]
    command: Command,
}

/// Logging flags shared by every subcommand.
#[derive(Args, Debug)]
struct LogFlags {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "TIDEPOOL_LOG_LEVEL",
        default_value_t = LogLevel::Warn
    )]
    log_level: LogLevel,

    /// Append logs to PATH instead of stderr
    #[arg(long = "log-file", global = true, value_name = "PATH", env = "TIDEPOOL_LOG_FILE")]
    log_file: Option<PathBuf>,
}

impl From<&LogFlags> for LogConfig {
    fn from(flags: &LogFlags) -> Self {
        LogConfig {
            level: flags.log_level,
            file: flags.log_file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scripted backend against a headless session
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "JSON-lines script, one response (array of chunks) per line"
    )]
    script: PathBuf,

    #[arg(long, default_value = "replay", help = "Backend route id to bind")]
    route: String,

    #[arg(long, help = "Keep the view open if the route is lost")]
    persist: bool,

    #[arg(long, default_value_t = 80)]
    width: u32,

    #[arg(long, default_value_t = 24)]
    height: u32,

    #[arg(long = "dump-requests", help = "Include every outgoing request in the output")]
    dump_requests: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("writing output: {0}")]
    Io(#[from] io::Error),
    #[error("encoding output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("script error: {0:#}")]
    Script(anyhow::Error),
    #[error("route bus: {0}")]
    Bus(#[from] route_bus::BusError),
    #[error("route '{0}' was not confirmed; session closed")]
    RouteUnconfirmed(String),
    #[error("cannot set up logging: {0}")]
    Logging(String),
}

/// Host without a screen: fixed geometry, remembers whether it was closed.
struct HeadlessHost {
    view: ViewState,
    closed: AtomicBool,
}

impl SessionHost for HeadlessHost {
    fn view_state(&self) -> ViewState {
        self.view.clone()
    }

    fn close_view(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn tree_updated(&self, version: u64) {
        debug!(target = "cli::replay", version, "tree updated");
    }
}

fn load_script(path: &Path) -> anyhow::Result<ScriptedTransport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    ScriptedTransport::from_script(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn handle_replay(args: ReplayArgs) -> Result<(), CliError> {
    let transport = Arc::new(load_script(&args.script).map_err(CliError::Script)?);
    let responses = transport.remaining_responses();
    let config = SessionConfig::from_env().with_persist(args.persist);
    let route_timeout = config.route_timeout;

    let bus = Arc::new(LocalRouteBus::new());
    bus.publish(&args.route, RouteStatus::Up)?;
    let host = Arc::new(HeadlessHost {
        view: ViewState {
            focused: true,
            width: args.width,
            height: args.height,
            background: false,
        },
        closed: AtomicBool::new(false),
    });

    let session = SyncSession::start(
        config,
        transport.clone(),
        bus,
        host.clone(),
        Some(args.route.clone()),
    )?;
    info!(
        target = "cli::replay",
        session_id = session.session_id(),
        responses,
        "replay started"
    );

    let first = tokio::time::timeout(route_timeout * 2, transport.wait_for_requests(1)).await;
    if first.is_err() || session.flags().disposed {
        return Err(CliError::RouteUnconfirmed(args.route));
    }
    settle(&session).await;

    while transport.remaining_responses() > 0 && !session.flags().disposed {
        session.render_done(session.global_version());
        settle(&session).await;
        if transport.remaining_responses() > 0 {
            session.send(true).await?;
            settle(&session).await;
        }
    }

    session.shutdown().await?;

    let mut output = json!({
        "sessionid": session.session_id(),
        "version": session.global_version(),
        "tree": session.with_tree(|tree| tree.root().map(flatten)),
        "cells": session.cells(),
        "messages": session.messages(),
        "closed": host.closed.load(Ordering::SeqCst),
    });
    if args.dump_requests {
        let requests: Vec<_> = transport
            .requests()
            .into_iter()
            .map(|recorded| recorded.request)
            .collect();
        output["requests"] = serde_json::to_value(requests)?;
    }

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &output)?;
    writeln!(stdout)?;
    Ok(())
}

/// Waits until no timer is armed and no request is outstanding.
async fn settle(session: &SyncSession) {
    loop {
        tokio::time::sleep(SETTLE_POLL).await;
        if !session.timer_pending() && !session.request_in_flight() {
            return;
        }
    }
}
