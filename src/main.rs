// Chunk: docs/chunks/demo_app - Demo host application for the loop bridge
//!
//! loop-bridge demo: drives a secondary event loop from a host message loop.
//!
//! In `integrated` mode a [`MessageLoop`] plays the host UI loop. The bridge
//! attaches the secondary loop to it, a few timers fire on the UI thread, and
//! a background thread posts work into the secondary loop and wakes the poll
//! thread. The demo exits once everything has run.
//!
//! In `forever` mode there is no host loop: the secondary loop runs on the
//! main thread until it has no work left.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use loop_bridge::{BridgeConfig, LoopBridge, MessageLoop, Task};
use loop_bridge_reactor::EventLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Attach the secondary loop to a host message loop
    Integrated,
    /// Run the secondary loop as the main loop
    Forever,
}

#[derive(Parser, Debug)]
#[command(name = "loop-bridge", about = "Drive a secondary event loop from a host message loop")]
struct Args {
    /// How the secondary loop is driven
    #[arg(long, value_enum, default_value_t = Mode::Integrated)]
    mode: Mode,

    /// Number of one-shot timers to schedule
    #[arg(long, default_value_t = 3)]
    timers: usize,

    /// Delay between consecutive timers, in milliseconds
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Bridge configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loop_bridge=info,loop_bridge_reactor=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::load_from(path)?,
        None => BridgeConfig::load(),
    };

    let delay = Duration::from_millis(args.delay_ms);
    match args.mode {
        Mode::Integrated => run_integrated(config, args.timers, delay),
        Mode::Forever => run_forever(config, args.timers, delay),
    }
}

/// Schedules `count` one-shot timers, `delay` apart. Each one calls `on_fire`
/// with its index after logging how late it ran.
fn schedule_timers(
    event_loop: &EventLoop,
    count: usize,
    delay: Duration,
    on_fire: impl Fn(usize) + Clone + Send + 'static,
) {
    let start = Instant::now();
    for index in 0..count {
        let due = delay.saturating_mul(u32::try_from(index + 1).unwrap_or(u32::MAX));
        let on_fire = on_fire.clone();
        event_loop.set_timeout(due, move |_| {
            let elapsed = start.elapsed();
            let current = thread::current();
            tracing::info!(
                index,
                due_ms = due.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                thread = ?current.name(),
                "timer fired"
            );
            on_fire(index);
        });
    }
}

fn run_integrated(config: BridgeConfig, timers: usize, delay: Duration) -> Result<()> {
    let mut message_loop = MessageLoop::new();
    let proxy = message_loop.proxy();

    let bridge = Rc::new(LoopBridge::create(message_loop.proxy(), config)?);
    bridge.prepare_integration()?;

    // Pick up anything that became ready while the UI thread was busy.
    let idle_bridge = Rc::clone(&bridge);
    message_loop.set_idle_handler(move || {
        idle_bridge.run_secondary_loop_once();
    });

    // Every timer plus the cross-thread post must run before we quit.
    let remaining = Arc::new(AtomicUsize::new(timers + 1));
    let finish_one = {
        let remaining = remaining.clone();
        let proxy = proxy.clone();
        move |_index: usize| {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                proxy.quit();
            }
        }
    };

    schedule_timers(bridge.event_loop(), timers, delay, finish_one.clone());

    let remote_loop = bridge.event_loop().clone();
    let remote_signal = bridge.wakeup_signal();
    let poster = thread::Builder::new()
        .name("demo-poster".to_string())
        .spawn(move || {
            thread::sleep(delay / 2);
            remote_loop.post(move |_| {
                let current = thread::current();
                tracing::info!(thread = ?current.name(), "cross-thread post ran");
                finish_one(usize::MAX);
            });
            remote_signal.trigger();
        })?;

    let started = Instant::now();
    message_loop.run();
    if poster.join().is_err() {
        tracing::error!("poster thread panicked");
    }

    bridge.shutdown();
    let stats = bridge.stats();
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        drain_requests = stats.drain_requests,
        poll_drains = stats.poll_drains,
        idle_drains = stats.idle_drains,
        callbacks_run = stats.callbacks_run,
        max_outstanding = stats.max_outstanding,
        "integrated run finished"
    );
    Ok(())
}

fn run_forever(config: BridgeConfig, timers: usize, delay: Duration) -> Result<()> {
    // No host loop exists, so nothing is ever posted to it.
    let bridge = LoopBridge::create(
        |_task: Task| tracing::warn!("unexpected drain request in forever mode"),
        config,
    )?;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    schedule_timers(bridge.event_loop(), timers, delay, move |_index| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let started = Instant::now();
    bridge.run_forever()?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        fired = fired.load(Ordering::Relaxed),
        "secondary loop finished"
    );
    Ok(())
}
