// Homiq toolbox: send commands with retry, sniff and diagnose the bus.

mod config;
mod report;
mod session;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use homiq_core::{normalize_pkt, Frame, Reassembler, RetryPolicy, Top};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::report::{DoctorReport, SniffSummary};
use crate::session::{MonitorOptions, SendResult, Session};
use crate::transport::{Endpoint, Link};

/// Homiq bus toolbox.
#[derive(Parser)]
#[command(name = "homiq", version)]
#[command(about = "Send Homiq commands, sniff frames and diagnose the link over TCP or serial")]
struct Cli {
    /// Gateway endpoint, HOST:PORT (e.g. 10.10.20.201:4001).
    #[arg(long, global = true, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Serial port (e.g. /dev/ttyUSB0 or /dev/ttyR00).
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Serial baud rate.
    #[arg(long, global = true)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single command and wait for its ACK, with retry.
    Send(SendArgs),

    /// Print frames seen on the bus, optionally acknowledging them.
    Sniff {
        /// Auto-send ACK for TOP=s frames.
        #[arg(long)]
        ack: bool,

        /// Do not validate CRC.
        #[arg(long)]
        no_crc: bool,

        /// Output frames as JSON lines.
        #[arg(long)]
        json: bool,

        /// Stop after N seconds (0 = until interrupted).
        #[arg(long, default_value = "0")]
        seconds: u64,
    },

    /// Collect link statistics for a while and emit a JSON report.
    Doctor {
        #[arg(long, default_value = "30")]
        seconds: u64,

        /// Auto-ACK TOP=s frames while diagnosing.
        #[arg(long)]
        ack: bool,

        /// Write the report to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Destination module address (e.g. 0H or 05).
    #[arg(long)]
    dst: String,

    /// Command (e.g. O.3, UD, GI, IM.7, IOM.0).
    #[arg(long)]
    cmd: String,

    /// Value (e.g. 0/1, u/d/s).
    #[arg(long)]
    val: String,

    /// Source address.
    #[arg(long, default_value = "0")]
    src: String,

    /// Packet counter (decimal).
    #[arg(long, default_value = "1")]
    pkt: String,

    /// Frame type (s or a).
    #[arg(long, default_value = "s")]
    top: Top,

    /// Attempts, including the first.
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds between attempts.
    #[arg(long)]
    retry_delay: Option<f64>,

    /// Seconds to wait for the ACK per attempt.
    #[arg(long)]
    timeout: Option<f64>,

    /// While waiting, auto-ACK incoming TOP=s frames.
    #[arg(long)]
    auto_ack: bool,
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load();
    let endpoint = resolve_endpoint(&cli, &cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let job_stop = stop.clone();
        let mut job =
            tokio::task::spawn_blocking(move || run(cli.command, endpoint, cfg, job_stop));
        tokio::select! {
            res = &mut job => res?,
            _ = shutdown_signal() => {
                info!("interrupt received, stopping");
                stop.store(true, Ordering::Relaxed);
                job.await?
            }
        }
    })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("homiq=info,homiq_core=info")),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Pick the link: CLI flags first, then the config file's defaults.
fn resolve_endpoint(cli: &Cli, cfg: &Config) -> Result<Endpoint> {
    let baud = cli.baud.unwrap_or(cfg.baud);
    let serial = |path: &str| Endpoint::Serial {
        path: path.to_string(),
        baud,
    };
    if let Some(tcp) = &cli.tcp {
        return Ok(tcp.parse()?);
    }
    if let Some(path) = &cli.serial {
        return Ok(serial(path));
    }
    if let Some(tcp) = &cfg.tcp {
        return tcp.parse().context("invalid tcp endpoint in config");
    }
    if let Some(path) = &cfg.serial {
        return Ok(serial(path));
    }
    bail!("no link given: pass --tcp HOST:PORT or --serial PATH, or set one in config.toml")
}

fn run(
    command: Commands,
    endpoint: Endpoint,
    cfg: Config,
    stop: Arc<AtomicBool>,
) -> Result<ExitCode> {
    let link =
        Link::open(&endpoint, &cfg).with_context(|| format!("cannot open link {}", endpoint))?;
    let reassembler = cfg.buffer_limit().map(Reassembler::with_limit).unwrap_or_default();
    let mut session = Session::new(link, reassembler, stop);
    match command {
        Commands::Send(args) => send(&mut session, args, &cfg),
        Commands::Sniff {
            ack,
            no_crc,
            json,
            seconds,
        } => {
            let opts = MonitorOptions {
                auto_ack: ack,
                skip_crc: no_crc,
                duration: (seconds > 0).then(|| Duration::from_secs(seconds)),
            };
            let end = session.monitor(opts, |frame, crc_ok| {
                if json {
                    match report::frame_json(frame, crc_ok) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!(error = %e, "cannot serialize frame"),
                    }
                } else {
                    println!("{}", report::frame_line(frame, crc_ok));
                }
            })?;
            let summary =
                SniffSummary::new(session.diagnostics(), session.overflowed_bytes(), end.elapsed);
            eprintln!("\n--- summary ---");
            eprintln!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor { seconds, ack, out } => {
            let opts = MonitorOptions {
                auto_ack: ack,
                skip_crc: false,
                duration: Some(Duration::from_secs(seconds)),
            };
            let end = session.monitor(opts, |_, _| {})?;
            let report = DoctorReport::new(
                endpoint,
                session.diagnostics(),
                session.overflowed_bytes(),
                end.elapsed,
                ack,
            );
            let text = serde_json::to_string_pretty(&report)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", text))
                        .with_context(|| format!("cannot write report to {}", path.display()))?;
                    println!("Wrote report: {}", path.display());
                }
                None => println!("{}", text),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn seconds(value: Option<f64>, default_ms: u64) -> Result<Duration> {
    match value {
        Some(s) => {
            Duration::try_from_secs_f64(s).with_context(|| format!("invalid duration {} s", s))
        }
        None => Ok(Duration::from_millis(default_ms)),
    }
}

fn send(session: &mut Session<Link>, args: SendArgs, cfg: &Config) -> Result<ExitCode> {
    let pkt = normalize_pkt(&args.pkt)?;
    let frame = Frame::new(args.cmd, args.val, args.src, args.dst, pkt, args.top);
    let policy = RetryPolicy {
        retries: args.retries.unwrap_or(cfg.retries),
        ack_timeout: seconds(args.timeout, cfg.ack_timeout_ms)?,
        retry_delay: seconds(args.retry_delay, cfg.retry_delay_ms)?,
        auto_ack: args.auto_ack,
    };
    info!(frame = %frame.encode().trim_end(), retries = policy.retries, "sending");
    match session.send(frame, policy)? {
        SendResult::Acked { attempts, .. } => {
            info!(attempts, "acknowledged");
            println!("OK: got ACK");
            Ok(ExitCode::SUCCESS)
        }
        SendResult::Exhausted { attempts } => {
            warn!(attempts, "no acknowledgement");
            eprintln!("ERR: no ACK");
            Ok(ExitCode::from(2))
        }
        SendResult::Interrupted { attempts } => {
            warn!(attempts, "interrupted before acknowledgement");
            Ok(ExitCode::from(130))
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
