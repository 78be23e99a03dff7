//! watchd - continuous object detection daemon
//!
//! This daemon:
//! 1. Loads the label table and detection model (aborting on failure)
//! 2. Registers one listener per configured label
//! 3. Runs the detection loop until Ctrl-C or a fatal loop error
//!
//! A listener with a `command` runs that program on every hit; without one the
//! hit is only logged.
//!
//! The default `tract` backend needs the `backend-tract` feature:
//! `cargo build --release --features backend-tract,ingest-v4l2`. Without it
//! only `backend = "stub"` starts.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

use object_watch::{DetectionLoop, ListenerConfig, ListenerRegistry, LoopEvent, WatchConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "OBJECT_WATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Additional labels to log when detected (repeatable).
    #[arg(long = "listen", value_name = "LABEL")]
    listen: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => WatchConfig::load_from(path)?,
        None => WatchConfig::load()?,
    };
    for label in args.listen {
        if !cfg.listeners.iter().any(|l| l.label == label) {
            cfg.listeners.push(ListenerConfig {
                label,
                command: None,
            });
        }
    }

    let detector = cfg.build_detector().context("failed to load detection model")?;
    let source = cfg.open_source().context("failed to set up camera")?;
    log::info!(
        "watchd: backend={} labels={} camera={} ({}x{})",
        detector.engine().name(),
        detector.labels().len(),
        source.name(),
        cfg.camera.width,
        cfg.camera.height
    );

    let registry = ListenerRegistry::new();
    for listener in &cfg.listeners {
        register_listener(&registry, listener);
    }
    if registry.is_empty() {
        log::warn!("watchd: no listeners configured; detections will not be reported");
    }

    let watch = DetectionLoop::new(detector, source, registry, cfg.loop_settings());
    let events = watch.subscribe();
    watch.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("watchd running. waiting for shutdown signal (Ctrl-C)...");
    let fatal = loop {
        if rx.recv_timeout(Duration::from_millis(250)).is_ok() {
            log::info!("shutdown signal received, stopping detection loop...");
            if let Err(err) = watch.stop() {
                log::warn!("stop: {}", err);
            }
            break None;
        }
        let mut stopped = None;
        for event in events.try_iter() {
            if let LoopEvent::Stopped { fatal } = event {
                stopped = Some(fatal);
            }
        }
        if let Some(fatal) = stopped {
            break fatal;
        }
    };

    watch.wait();
    let stats = watch.stats();
    log::info!(
        "watchd stopped after {} passes ({} failed, {} notifications)",
        stats.iterations,
        stats.failures,
        stats.notifications
    );
    match fatal {
        Some(err) => Err(anyhow!("detection loop stopped: {}", err)),
        None => Ok(()),
    }
}

fn register_listener(registry: &ListenerRegistry, listener: &ListenerConfig) {
    let label = listener.label.clone();
    match listener.command.clone() {
        Some(command) => {
            log::info!("watchd: '{}' runs {:?}", label, command);
            registry.add_listener(listener.label.clone(), move || {
                run_command(&label, &command);
            });
        }
        None => {
            log::info!("watchd: logging '{}'", label);
            registry.add_listener(listener.label.clone(), move || {
                log::info!("detected {}", label);
            });
        }
    }
}

/// Spawn `command` without blocking the detection loop.
fn run_command(label: &str, command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };
    match Command::new(program)
        .args(args)
        .env("OBJECT_WATCH_LABEL", label)
        .spawn()
    {
        Ok(mut child) => {
            let label = label.to_string();
            std::thread::spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    log::warn!("listener command for '{}' exited with {}", label, status)
                }
                Ok(_) => {}
                Err(err) => log::warn!("listener command for '{}' failed: {}", label, err),
            });
        }
        Err(err) => log::error!("failed to run listener command for '{}': {}", label, err),
    }
}
