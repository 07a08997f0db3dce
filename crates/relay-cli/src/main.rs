mod console;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use relay_dispatch::{doctor as dispatch_doctor, CommandDispatcher, DispatchConfig};
use relay_ingest::{doctor as ingest_doctor, IngestConfig, IngestPoller, Ingested, TrackRegistry};
use relay_link::{doctor as link_doctor, ConnectionWorker, LinkConfig, LinkEvent, SessionHandle};
use relay_proto::{ConnectionStatus, OutboundCommand, TelemetrySnapshot};

use console::Intent;
use simulate::{SimulateOpts, Traffic};

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Ground-control relay: vehicle link, detection ingest, operator commands")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Link + ingest + operator console on stdin.
    Run,
    /// One-shot payload commands (no vehicle session needed).
    Send { #[command(subcommand)] cmd: SendCmd },
    /// Generate test traffic toward a running relay.
    Simulate { #[command(subcommand)] cmd: SimCmd },
}

#[derive(Debug, Subcommand)]
enum SendCmd {
    Gimbal {
        #[arg(allow_negative_numbers = true)]
        roll: f32,
        #[arg(allow_negative_numbers = true)]
        pitch: f32,
        #[arg(allow_negative_numbers = true)]
        yaw: f32,
        #[arg(allow_negative_numbers = true)]
        zoom: f32,
    },
    Select {
        id: i64,
        #[arg(long, default_value = "")]
        data: String,
    },
}

#[derive(Debug, Subcommand)]
enum SimCmd {
    Pins(SimArgs),
    Objects(SimArgs),
}

#[derive(Debug, clap::Args)]
struct SimArgs {
    /// Number of datagrams; 0 runs until interrupted.
    #[arg(long, default_value_t = 0)]
    count: usize,
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Defaults to the configured ingest port on localhost.
    #[arg(long)]
    target: Option<SocketAddr>,
    /// Listen here and print selection packets coming back.
    #[arg(long)]
    control: Option<SocketAddr>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Config {
    link: Option<LinkConfig>,
    #[serde(default)]
    ingest: IngestConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Send { cmd } => send(&cfg, cmd)?,
        Command::Simulate { cmd } => simulate(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    match &cfg.link {
        Some(link) if link.enable => link_doctor::check_link(link)?,
        _ => info!("doctor: vehicle link disabled"),
    }
    ingest_doctor::check_ingest(&cfg.ingest)?;
    dispatch_doctor::check_dispatch(&cfg.dispatch)?;

    info!("doctor: OK");
    Ok(())
}

fn send(cfg: &Config, cmd: SendCmd) -> Result<()> {
    let dispatcher = CommandDispatcher::new(cfg.dispatch.clone())?;
    let out = match cmd {
        SendCmd::Gimbal { roll, pitch, yaw, zoom } => OutboundCommand::gimbal(roll, pitch, yaw, zoom),
        SendCmd::Select { id, data } => OutboundCommand::select_id(id, data),
    };
    dispatcher.send(out, None)?;
    Ok(())
}

async fn simulate(cfg: &Config, cmd: SimCmd) -> Result<()> {
    let (kind, args, port, every) = match cmd {
        SimCmd::Pins(a) => (Traffic::Pins, a, cfg.ingest.pin_addr().port(), 5000),
        SimCmd::Objects(a) => (Traffic::Objects, a, cfg.ingest.detection_addr().port(), 1000),
    };
    let opts = SimulateOpts {
        target: args.target.unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], port))),
        count: args.count,
        interval: Duration::from_millis(args.interval_ms.unwrap_or(every)),
        control: args.control,
    };
    tokio::select! {
        res = simulate::run(kind, opts) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("simulate: stopped");
            Ok(())
        }
    }
}

/// Operator-facing state shared between the console and the event logger.
#[derive(Debug, Default)]
struct LiveState {
    last_status: Option<ConnectionStatus>,
    telemetry: Option<TelemetrySnapshot>,
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let registry = TrackRegistry::new();
    let mut pollers = vec![
        IngestPoller::bind("detections", cfg.ingest.detection_addr(), registry.clone())?,
        IngestPoller::bind("pins", cfg.ingest.pin_addr(), registry.clone())?,
    ];
    let dispatcher = CommandDispatcher::new(cfg.dispatch.clone())?;

    let live = Arc::new(Mutex::new(LiveState::default()));
    let link_cfg = cfg.link.as_ref().filter(|l| l.enable);
    let worker = match link_cfg {
        Some(l) => {
            let w = ConnectionWorker::new(l.clone())?;
            tokio::spawn(log_events(w.subscribe(), live.clone()));
            Some(w)
        }
        None => {
            info!("run: vehicle link disabled");
            None
        }
    };

    let mut session: Option<SessionHandle> = match (&worker, link_cfg) {
        (Some(w), Some(l)) => Some(w.start(&l.endpoint)?),
        _ => None,
    };

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(cfg.ingest.tick());

    loop {
        tokio::select! {
            _ = tick.tick() => {
                for p in pollers.iter_mut() {
                    for batch in p.tick() {
                        report(&batch);
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                let intent = match console::parse(&line) {
                    Ok(Some(i)) => i,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("! {:#}", e);
                        continue;
                    }
                };
                if intent == Intent::Quit {
                    break;
                }
                handle_intent(intent, &worker, link_cfg, &mut session, &registry, &dispatcher, &live).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Some(s) = session.take() {
        let last = end_session(s).await?;
        info!("run: session ended {}", last);
    }
    info!("run: bye");
    Ok(())
}

/// Stops the session and waits until its transport is closed.
async fn end_session(s: SessionHandle) -> Result<ConnectionStatus> {
    s.stop();
    Ok(tokio::task::spawn_blocking(move || s.join()).await?)
}

async fn handle_intent(
    intent: Intent,
    worker: &Option<ConnectionWorker>,
    link_cfg: Option<&LinkConfig>,
    session: &mut Option<SessionHandle>,
    registry: &TrackRegistry,
    dispatcher: &CommandDispatcher,
    live: &Mutex<LiveState>,
) -> Result<()> {
    let outcome = |res: Result<(), relay_dispatch::DispatchError>| match res {
        Ok(()) => println!("ok"),
        Err(e) => println!("! {}", e),
    };

    match intent {
        Intent::Connect(ep) => {
            let (Some(w), Some(l)) = (worker, link_cfg) else {
                println!("! vehicle link disabled in config");
                return Ok(());
            };
            if let Some(old) = session.take() {
                // the old session has to let go of the endpoint before we reopen it
                let last = end_session(old).await?;
                info!("run: previous session ended {}", last);
            }
            let ep = ep.unwrap_or_else(|| l.endpoint.clone());
            match w.start(&ep) {
                Ok(s) => {
                    println!("session {} -> {}", s.id(), ep);
                    *session = Some(s);
                }
                Err(e) => println!("! {:#}", e),
            }
        }
        Intent::Disconnect => match session.take() {
            Some(s) => {
                let id = s.id();
                println!("session {} ended: {}", id, end_session(s).await?);
            }
            None => println!("! no session"),
        },
        Intent::Arm => outcome(dispatcher.send(OutboundCommand::Arm, session.as_ref())),
        Intent::Disarm => outcome(dispatcher.send(OutboundCommand::Disarm, session.as_ref())),
        Intent::Mode(name) => outcome(dispatcher.send(OutboundCommand::SetMode(name), session.as_ref())),
        Intent::Modes => match worker {
            Some(w) => println!("{}", w.modes().names().collect::<Vec<_>>().join(" ")),
            None => println!("! vehicle link disabled in config"),
        },
        Intent::Gimbal(axes) => outcome(dispatcher.send(OutboundCommand::GimbalAxes(axes), None)),
        Intent::Select(id) => match registry.on_select(id) {
            Some(t) => outcome(dispatcher.send(OutboundCommand::select(&t), None)),
            None => println!("! no track {}", id),
        },
        Intent::Tracks => {
            let tracks = registry.tracks();
            if tracks.is_empty() {
                println!("(no tracks)");
            }
            for t in tracks {
                println!(
                    "{:>4}  {:<10} x={:.0} y={:.0} w={:.0} h={:.0}  {}",
                    t.id, t.label, t.rect.x, t.rect.y, t.rect.w, t.rect.h, t.aux_data
                );
            }
        }
        Intent::Status => {
            match session {
                Some(s) => println!("session {}: {}", s.id(), s.status()),
                None => println!("no session"),
            }
            let st = live.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = &st.last_status {
                println!("last event: {}", last);
            }
            match &st.telemetry {
                Some(t) => println!("{}", telemetry_line(t)),
                None => println!("no telemetry yet"),
            }
        }
        Intent::Help => println!("{}", console::HELP),
        Intent::Quit => {}
    }
    Ok(())
}

fn telemetry_line(t: &TelemetrySnapshot) -> String {
    let now_ms = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    format!(
        "{} {} lat={:.7} lon={:.7} alt={:.1}m gs={:.1}m/s batt={:.2}V {}% age={}ms",
        t.flight_mode,
        if t.armed { "ARMED" } else { "disarmed" },
        t.lat,
        t.lon,
        t.relative_alt_m,
        t.ground_speed,
        t.battery_voltage,
        t.battery_remaining,
        now_ms.saturating_sub(t.updated_unix_ms),
    )
}

fn report(batch: &Ingested) {
    match batch {
        Ingested::Pins(pins) => {
            for p in pins {
                info!("ingest: pin '{}' @ {:.6},{:.6}", p.name, p.lat, p.lon);
            }
        }
        Ingested::Objects(tracks) => info!("ingest: detection frame, {} tracks", tracks.len()),
    }
}

async fn log_events(mut rx: broadcast::Receiver<LinkEvent>, live: Arc<Mutex<LiveState>>) {
    loop {
        match rx.recv().await {
            Ok(LinkEvent::Status { session, status }) => {
                info!("link: session {} {}", session, status);
                live.lock().unwrap_or_else(PoisonError::into_inner).last_status = Some(status);
            }
            Ok(LinkEvent::Telemetry { snapshot, .. }) => {
                live.lock().unwrap_or_else(PoisonError::into_inner).telemetry = Some(snapshot);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("link: event log lagged, {} events skipped", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
