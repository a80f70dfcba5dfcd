use std::io::{self, BufRead};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use log::{error, info, warn};
use tokio::sync::oneshot;

use movesense_rs::prelude::*;
use movesense_rs::protocol::{DEFAULT_NAME_PATTERN, SAMPLE_INTERVAL_SECS};
use movesense_rs::simulator::Simulator;

/// Consumer refresh period.
const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// How often the status line is printed.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "movesense-rs",
    version,
    about = "Stream 9-axis IMU data from a Movesense sensor over BLE"
)]
struct Args {
    /// Connect to the first device whose advertised name contains this string
    #[arg(long, default_value = DEFAULT_NAME_PATTERN)]
    name: String,

    /// Seconds to scan before giving up
    #[arg(long, default_value_t = 5)]
    scan_timeout: u64,

    /// Capacity of the sample queue between the BLE thread and this one
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    capacity: usize,

    /// Number of samples kept in the live window
    #[arg(long, default_value_t = DEFAULT_WINDOW_LEN)]
    window: usize,

    /// Feed synthetic frames through the decoder instead of using BLE
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // RUST_LOG=movesense_rs=debug for per-frame diagnostics.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut source = if args.simulate {
        info!("Simulation mode: no BLE hardware is used.");
        Source::Simulated(Simulator::spawn(args.capacity))
    } else {
        Source::Live(BleWorker::spawn(SessionConfig {
            name_pattern: args.name.clone(),
            scan_timeout_secs: args.scan_timeout,
            channel_capacity: args.capacity,
            ..Default::default()
        })?)
    };

    let mut consumer = SampleConsumer::new(source.channel(), args.window);
    let lines = spawn_stdin_reader();
    let mut pending: Vec<(SessionCommand, oneshot::Receiver<CommandOutcome>)> = Vec::new();
    let mut last_status = Instant::now();

    info!("Commands (type + Enter):");
    info!("  c  – connect       s  – start streaming");
    info!("  x  – stop          d  – disconnect");
    info!("  r  – toggle recording");
    info!("  q  – quit");

    // ── Consumer loop ─────────────────────────────────────────────────────────
    'main: loop {
        loop {
            let line = match lines.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("stdin closed.");
                    break 'main;
                }
            };
            let command = match line.as_str() {
                "" => continue,
                "q" => {
                    info!("Quit requested.");
                    break 'main;
                }
                "r" => {
                    toggle_recording(&mut consumer);
                    continue;
                }
                "c" => SessionCommand::Connect,
                "s" => SessionCommand::StartStreaming,
                "x" => SessionCommand::StopStreaming,
                "d" => SessionCommand::Disconnect,
                other => {
                    warn!("Unknown command '{other}'");
                    continue;
                }
            };
            pending.push((command, source.submit(command)));
        }

        pending.retain_mut(|(command, rx)| match rx.try_recv() {
            Ok(Ok(msg)) => {
                info!("{msg}");
                if *command == SessionCommand::Disconnect {
                    consumer.clear_window();
                }
                false
            }
            Ok(Err(e)) => {
                error!("{command:?}: {e}");
                false
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => false,
        });

        consumer.poll();

        if last_status.elapsed() >= STATUS_INTERVAL {
            print_status(source.state(), &consumer, source.channel().dropped());
            last_status = Instant::now();
        }
        thread::sleep(POLL_INTERVAL);
    }

    if consumer.is_recording() {
        toggle_recording(&mut consumer);
    }
    source.shutdown();
    info!("Exiting.");
    Ok(())
}

/// Read stdin lines on a dedicated OS thread and relay them to the consumer
/// loop, which must never block on input.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn toggle_recording(consumer: &mut SampleConsumer) {
    if consumer.is_recording() {
        let rec = consumer.stop_recording();
        println!(
            "[REC] {} sample(s), {:.1} s",
            rec.len(),
            rec.len() as f64 * SAMPLE_INTERVAL_SECS
        );
    } else {
        consumer.start_recording();
    }
}

fn print_status(state: SessionState, consumer: &SampleConsumer, dropped: u64) {
    let window = consumer.window();
    let rec = if consumer.is_recording() {
        format!("  rec={}", consumer.recorded_len())
    } else {
        String::new()
    };
    match window.latest() {
        Some(s) => println!(
            "[{state}] rx={} win={}/{} dropped={dropped}{rec}  t={:.2}s  \
             acc=({:+.3},{:+.3},{:+.3})  gyro=({:+.2},{:+.2},{:+.2})  mag=({:+.1},{:+.1},{:+.1})",
            consumer.total_received(),
            window.len(),
            window.capacity(),
            s.seconds(),
            s.accel[0],
            s.accel[1],
            s.accel[2],
            s.gyro[0],
            s.gyro[1],
            s.gyro[2],
            s.mag[0],
            s.mag[1],
            s.mag[2],
        ),
        None => println!(
            "[{state}] rx={} win=0/{} dropped={dropped}{rec}",
            consumer.total_received(),
            window.capacity()
        ),
    }
}

// ── Data sources ──────────────────────────────────────────────────────────────

enum Source {
    Live(BleWorker),
    Simulated(Simulator),
}

impl Source {
    fn channel(&self) -> SampleChannel {
        match self {
            Source::Live(w) => w.channel(),
            Source::Simulated(s) => s.channel(),
        }
    }

    fn state(&self) -> SessionState {
        match self {
            Source::Live(w) => w.state(),
            Source::Simulated(s) => s.state(),
        }
    }

    fn submit(&mut self, command: SessionCommand) -> oneshot::Receiver<CommandOutcome> {
        match self {
            Source::Live(w) => w.submit(command),
            Source::Simulated(s) => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(s.apply(command));
                rx
            }
        }
    }

    fn shutdown(self) {
        match self {
            Source::Live(w) => w.shutdown(),
            Source::Simulated(s) => s.shutdown(),
        }
    }
}
