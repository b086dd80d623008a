// SPDX-License-Identifier: GPL-2.0
//
// cputopo - CPU topology tracker CLI
//
// Boots a described machine through the topology tracker, prints the
// resulting capacities and sibling masks, and optionally keeps running to
// apply power-saving policy changes written to a control file.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, info, warn};
use notify::{RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cputopo::config::{ControlConfig, TopoConfig};
use cputopo::control::{self, ControlInterface};
use cputopo::{MachineDescription, PowerSavings, TopologyObserver, TopologyTracker};

/// cputopo - CPU capacity and sibling mask tracker
#[derive(Parser, Debug)]
#[command(name = "cputopo")]
#[command(author = "ghostkellz <ckelley@ghostkellz.sh>")]
#[command(version)]
#[command(about = "Track CPU topology, capacities and power-saving sibling masks")]
struct Args {
    /// Machine description (TOML)
    #[arg(short, long, env = "CPUTOPO_MACHINE")]
    machine: Option<PathBuf>,

    /// Configuration file (default: /etc/cputopo/config.toml, ~/.config/cputopo/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Multi-core power-saving level (none, basic, wakeup)
    #[arg(long)]
    mc_power_savings: Option<PowerSavings>,

    /// Multi-thread power-saving level (none, basic, wakeup)
    #[arg(long)]
    smt_power_savings: Option<PowerSavings>,

    /// Override a CPU capacity, as CPU=VALUE (repeatable)
    #[arg(long, value_name = "CPU=VALUE")]
    set_capacity: Vec<String>,

    /// Print the topology as JSON
    #[arg(long)]
    json: bool,

    /// Keep running and apply commands written to the control file
    #[arg(long)]
    daemon: bool,

    /// Generate shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<clap_complete::Shell>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging (very verbose)
    #[arg(short, long)]
    debug: bool,
}

/// Wakeups of the daemon loop
enum DaemonEvent {
    ControlChanged,
    TopologyChanged(PowerSavings),
}

fn parse_capacity_override(spec: &str) -> Result<(usize, &str)> {
    let Some((cpu, value)) = spec.split_once('=') else {
        bail!("capacity override {:?} is not CPU=VALUE", spec);
    };
    let cpu = cpu
        .trim()
        .parse::<usize>()
        .with_context(|| format!("Invalid CPU in capacity override {:?}", spec))?;
    Ok((cpu, value))
}

fn print_topology(tracker: &TopologyTracker, json: bool) -> Result<()> {
    let report = tracker.report()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{:>4} {:>6} {:>5} {:>6} {:>10} {:>8}  {:<16} {:<16}",
        "CPU", "SOCKET", "CORE", "THREAD", "FAMILY", "CAPACITY", "CORE_SIBLINGS", "THREAD_SIBLINGS"
    );

    for cpu in &report {
        let fmt_opt = |v: Option<u32>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
        let (socket, core, thread, family) = match cpu.identity {
            Some(id) => (
                fmt_opt(id.socket_id),
                id.core_id.to_string(),
                fmt_opt(id.thread_id),
                format!("{:#010x}", id.family_id),
            ),
            None => ("?".into(), "?".into(), "?".into(), "offline".into()),
        };

        println!(
            "{:>4} {:>6} {:>5} {:>6} {:>10} {:>8}  {:<16} {:<16}",
            cpu.cpu,
            socket,
            core,
            thread,
            family,
            cpu.capacity,
            cpu.core_siblings.to_string(),
            cpu.thread_siblings.to_string()
        );
    }

    println!(
        "mc_power_savings={} smt_power_savings={} asym_packing={} generation={}",
        tracker.policy().mc_power_savings(),
        tracker.policy().smt_power_savings(),
        tracker.sd_asym_packing(),
        tracker.mask_generation()
    );

    Ok(())
}

fn run_daemon(tracker: &TopologyTracker, control_config: &ControlConfig, json: bool) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Failed to set signal handler")?;

    let mut control = ControlInterface::new(&control_config.dir);
    control.init()?;

    let (tx, rx) = channel::unbounded();

    let watch_tx = tx.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res
            && (event.kind.is_modify() || event.kind.is_create())
        {
            let _ = watch_tx.send(DaemonEvent::ControlChanged);
        }
    })
    .context("Failed to create control file watcher")?;

    if let Err(e) = watcher.watch(&control_config.dir, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {:?}, polling only: {}", control_config.dir, e);
    }

    let observer_tx = tx.clone();
    let observer: Arc<dyn TopologyObserver> = Arc::new(move |level: PowerSavings| {
        let _ = observer_tx.send(DaemonEvent::TopologyChanged(level));
    });
    tracker.register_observer(observer.clone())?;

    let interval = Duration::from_millis(control_config.poll_interval_ms.max(10));
    info!("cputopo v{} running...", env!("CARGO_PKG_VERSION"));

    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(interval) {
            Ok(DaemonEvent::TopologyChanged(level)) => {
                info!("Topology changed (mc_power_savings={})", level);
                print_topology(tracker, json)?;
            }
            Ok(DaemonEvent::ControlChanged) | Err(RecvTimeoutError::Timeout) => {
                let commands = control.poll_commands();
                if !commands.is_empty() {
                    debug!("Applying {} control commands", commands.len());
                    control::apply_commands(tracker, &commands);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("cputopo shutting down...");
    tracker.unregister_observer(&observer)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "cputopo", &mut std::io::stdout());
        return Ok(());
    }

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &args.config {
        Some(path) => TopoConfig::load_from_path(path)?,
        None => TopoConfig::load()?,
    };

    let Some(machine_path) = &args.machine else {
        bail!("no machine description given (use --machine or CPUTOPO_MACHINE)");
    };
    let machine = MachineDescription::load_from_path(machine_path)?;

    let tracker = TopologyTracker::boot_machine(&machine, &config.capacity)?;

    let mc = args
        .mc_power_savings
        .unwrap_or(config.policy.sched_mc_power_savings);
    let smt = args
        .smt_power_savings
        .unwrap_or(config.policy.sched_smt_power_savings);
    tracker.policy().set_mc_power_savings(mc);
    tracker.policy().set_smt_power_savings(smt);
    if tracker.on_policy_maybe_changed() {
        info!("Applied power-saving policy mc={} smt={}", mc, smt);
    }

    for spec in &args.set_capacity {
        let (cpu, value) = parse_capacity_override(spec)?;
        tracker
            .write_capacity_text(cpu, value)
            .with_context(|| format!("Failed to override capacity of CPU {}", cpu))?;
    }

    print_topology(&tracker, args.json)?;

    if args.daemon {
        run_daemon(&tracker, &config.control, args.json)?;
    }

    Ok(())
}
