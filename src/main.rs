#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use overlay_host::config::PluginConfig;
use overlay_host::event_bus::EventBus;
use overlay_host::hotkeys::HotkeyDispatcher;
use overlay_host::hotkeys::x11::X11HotkeyBackend;
use overlay_host::window::Platform;
use overlay_host::window::headless::HeadlessPlatform;
use overlay_host::window::x11::X11Platform;
use overlay_host::{OverlayInstance, OverlayOptions, Services};

/// Show a web overlay above other windows
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Overlay name; settings are stored under this name
    #[arg(long, default_value = "overlay")]
    name: String,

    /// Page to show, replacing the stored url
    #[arg(long)]
    url: Option<String>,

    /// Run without a display server
    #[arg(long)]
    headless: bool,

    /// Config file [default: <config dir>/overlay-host/config.json]
    #[arg(long)]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error; overrides LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,

    /// Event-bus topic the overlay subscribes to and the update tick publishes on
    #[arg(long, default_value = "heartbeat")]
    topic: String,
}

fn parse_level(level: &str) -> TraceLevel {
    match level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn hotkey_dispatcher(headless: bool) -> Arc<HotkeyDispatcher> {
    if headless {
        return Arc::new(HotkeyDispatcher::local());
    }
    match X11HotkeyBackend::connect() {
        Ok((backend, presses)) => {
            let dispatcher = Arc::new(HotkeyDispatcher::new(Box::new(backend)));
            dispatcher.spawn_pump(presses);
            info!("Global hotkeys enabled");
            dispatcher
        }
        Err(e) => {
            warn!(error = ?e, "Global hotkeys unavailable, bindings stay in-process");
            Arc::new(HotkeyDispatcher::local())
        }
    }
}

#[cfg(unix)]
fn register_shutdown(flag: &Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    signal_hook::flag::register(SIGINT, flag.clone()).context("Failed to register SIGINT handler")?;
    signal_hook::flag::register(SIGTERM, flag.clone()).context("Failed to register SIGTERM handler")?;
    Ok(())
}

#[cfg(not(unix))]
fn register_shutdown(_flag: &Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // --log-level wins over LOG_LEVEL
    let log_level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&log_level))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")?;

    let path = args.config.clone().unwrap_or_else(PluginConfig::default_path);
    let plugin_config = Arc::new(PluginConfig::load(&path)?);
    let interval = Duration::from_millis(plugin_config.global().update_interval_ms.max(1));

    let platform: Arc<dyn Platform> = if args.headless {
        Arc::new(HeadlessPlatform::new())
    } else {
        Arc::new(X11Platform::new(None))
    };
    let services = Services::new()
        .with_plugin_config(plugin_config.clone())
        .with_hotkeys(hotkey_dispatcher(args.headless))
        .with_event_bus(Arc::new(EventBus::new()))
        .with_platform(platform);

    let topic = args.topic.clone();
    let ticks = AtomicU64::new(0);
    let options = OverlayOptions::default()
        .with_update_interval(interval)
        .with_update_hook(move |overlay| {
            let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
            overlay
                .event_bus()
                .publish(&topic, &json!({ "overlay": overlay.name(), "tick": tick }));
            Ok(())
        });

    let overlay = OverlayInstance::new(&args.name, None, &services, options)?;
    if let (Some(url), Some(config)) = (args.url.as_deref(), overlay.config()) {
        config.set_url(url);
    }
    overlay.subscribe(&args.topic);
    overlay.start()?;
    info!(overlay = %overlay.name(), config = %path.display(), "Overlay running, press Ctrl+C to exit");

    let shutdown = Arc::new(AtomicBool::new(false));
    register_shutdown(&shutdown)?;
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("Shutting down");
    overlay.save_position_and_size();
    plugin_config.save_or_warn();
    overlay.dispose();
    Ok(())
}
