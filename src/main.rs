use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use crossbeam_channel::{never, select, tick};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use panelcast::cli::{Args, Command};
use panelcast::config::{self, PathConfig, SessionConfig};
use panelcast::core::events::{ErrorEvent, StatusEvent};
use panelcast::device::{Connector, DeviceInfo, FileTransport};
use panelcast::entities::OverlayElement;
use panelcast::metrics::{MetricsSource, SystemMetrics, format_metric};
use panelcast::settings::{KEY_SELECTED_DEVICE, SettingsStore};
use panelcast::theme::{self, category_label};
use panelcast::{Frame, Session};

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());

    // Ensure directories exist
    if let Err(e) = path_config.ensure_dirs() {
        eprintln!("Warning: Failed to create application directories: {:#}", e);
    }

    init_logger(&args, &path_config)?;
    debug!("Command-line args: {:?}", args);

    let Some(command) = args.command.clone() else {
        Args::command().print_help()?;
        println!();
        return Ok(());
    };

    let settings = SettingsStore::new(path_config.settings_file());
    info!("Settings: {}", settings.path().display());

    match command {
        Command::Color { hex } => {
            let mut session = open_session(&args, &path_config, settings)?;
            session
                .send_color(&hex)
                .with_context(|| format!("Failed to send color {}", hex))?;
        }
        Command::Send { image } => {
            let mut session = open_session(&args, &path_config, settings)?;
            send_image(&mut session, &image)?;
        }
        Command::Play {
            source,
            seconds,
            metrics,
        } => {
            let mut session = open_session(&args, &path_config, settings)?;
            play(&mut session, &source, seconds.map(Duration::from_secs), metrics)?;
        }
        Command::Themes { dir } => {
            let themes = theme::discover_themes(&dir);
            if themes.is_empty() {
                println!("No themes in {}", dir.display());
            }
            for t in themes {
                let category = t
                    .category
                    .and_then(|c| category_label(&c.to_string()))
                    .unwrap_or("-");
                println!(
                    "{:<24} {:<10} {}{}",
                    t.name,
                    category,
                    if t.is_user { "user" } else { "default" },
                    if t.has_video { " +video" } else { "" }
                );
            }
        }
        Command::Select { path } => {
            settings
                .set(
                    KEY_SELECTED_DEVICE,
                    serde_json::Value::String(path.to_string_lossy().into_owned()),
                )
                .context("Failed to save selected device")?;
            println!("Selected device: {}", path.display());
        }
        Command::Info => {
            let mut source = SystemMetrics::new();
            // CPU usage needs two samples
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            for (key, value) in source.snapshot().iter() {
                println!("{:<12} {}", key, format_metric(key, value));
            }
        }
    }
    Ok(())
}

/// 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
fn init_logger(args: &Args, path_config: &PathConfig) -> Result<()> {
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| path_config.data_file(config::LOG_FILE));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!(
            "Logging to file: {} (level: {:?})",
            log_path.display(),
            log_level
        );
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Session with CLI overrides applied and a device attached if one is known
fn open_session(args: &Args, path_config: &PathConfig, settings: SettingsStore) -> Result<Session> {
    let config = SessionConfig::load(&path_config.session_file())?;
    let saved_device = settings.get_str(KEY_SELECTED_DEVICE);

    let connector: Connector = Arc::new(|device: &DeviceInfo| FileTransport::connect(device));
    let mut session = Session::new(config, settings, connector)?;

    session.bus().subscribe::<StatusEvent, _>(|e| println!("{}", e.0));
    session.bus().subscribe::<ErrorEvent, _>(|e| eprintln!("Error: {}", e.0));

    if let Some((w, h)) = args.resolution {
        session.set_resolution(w, h);
    }
    if let Some(rotation) = args.rotation {
        session.set_rotation(rotation);
    }
    if let Some(brightness) = args.brightness {
        session.set_brightness(brightness);
    }

    match (&args.device, saved_device) {
        (Some(path), _) => session.select_device(DeviceInfo::new(path, "LCD")),
        (None, Some(saved)) => session.set_devices(vec![DeviceInfo::new(saved, "LCD")]),
        (None, None) => warn!("No device selected; frames are composed but not sent"),
    }
    Ok(session)
}

fn wait_for_transfer(session: &Session) {
    if let Some(channel) = session.channel()
        && !channel.wait_idle(session.config().transfer_timeout())
    {
        warn!("Transfer still in flight at exit");
    }
}

fn send_image(session: &mut Session, path: &Path) -> Result<()> {
    if session.channel().is_none() {
        bail!("No device selected (use --device or `panelcast select`)");
    }
    let frame = Frame::open(path).with_context(|| format!("Failed to load {}", path.display()))?;
    session.set_auto_send(false);
    session.set_background(frame);
    if !session.send_current_image() {
        bail!("Device busy, image not sent");
    }
    wait_for_transfer(session);
    match session.channel() {
        Some(channel) if channel.sends_failed() > 0 => bail!("Send failed"),
        _ => Ok(()),
    }
}

fn play(
    session: &mut Session,
    source: &Path,
    limit: Option<Duration>,
    with_metrics: bool,
) -> Result<()> {
    session.load_video(source)?;

    let mut metrics_source = if with_metrics {
        let overlay = session.overlay_mut();
        overlay.add_element(OverlayElement::metric("cpu_percent", "CPU ", 8, 8));
        overlay.add_element(OverlayElement::metric("mem_percent", "MEM ", 8, 28));
        overlay.add_element(OverlayElement::metric("cpu_temp", "TEMP ", 8, 48));
        overlay.enable(true);
        Some(SystemMetrics::new())
    } else {
        None
    };

    session.player_mut().play();
    let interval = Duration::from_millis(session.player().frame_interval_ms().max(1));
    info!("Playing {} every {:?}", source.display(), interval);

    let frames = tick(interval);
    let metrics_ticks = if metrics_source.is_some() {
        tick(Duration::from_secs(1))
    } else {
        never()
    };
    let started = Instant::now();
    let deadline = limit.map(|l| started + l);
    let mut ticks = 0u64;

    loop {
        select! {
            recv(frames) -> _ => {
                if session.tick().is_some() {
                    ticks += 1;
                }
            }
            recv(metrics_ticks) -> _ => {
                if let Some(src) = metrics_source.as_mut() {
                    session.update_metrics(src.snapshot());
                }
            }
        }
        // Drain queued notifications; subscribers already ran
        let _ = session.bus().poll();
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    session.stop_video();
    wait_for_transfer(session);
    if let Some(channel) = session.channel() {
        println!(
            "{} ticks in {:.1}s: {} sent, {} dropped, {} failed",
            ticks,
            started.elapsed().as_secs_f32(),
            channel.sends_completed(),
            channel.sends_dropped(),
            channel.sends_failed()
        );
    } else {
        println!("{} ticks in {:.1}s (no device)", ticks, started.elapsed().as_secs_f32());
    }
    Ok(())
}
