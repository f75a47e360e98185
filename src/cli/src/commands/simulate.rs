//! Session simulation command.
//!
//! Starts N replicas with skewed local clocks on one in-memory hub, aligns
//! their offsets the way joining peers do, plays a deterministic script of
//! toggles, marks, resets and renames round-robin across the replicas, and
//! reports whether every replica ended with the same board.

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tracing::info;

use lapsync_core::board::{format_seconds, Board};
use lapsync_core::clock::{ClockOffset, ManualClock};
use lapsync_core::config::Config;
use lapsync_core::inhibit::SuspendInhibitor;
use lapsync_core::persistence::{Checkpoint, JsonFilePersistence, Persistence};
use lapsync_core::transport::{HubConfig, HubStats, MemoryHub, Multiplexer};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of replicas
    #[arg(short, long, default_value = "3")]
    replicas: usize,

    /// Watches per board; defaults to `replica.watch_count`
    #[arg(short, long)]
    watches: Option<usize>,

    /// Number of scripted actions
    #[arg(short, long, default_value = "60")]
    steps: usize,

    /// Shared seconds between actions
    #[arg(long, default_value = "0.75")]
    interval: f64,

    /// Varies which watch and action each step picks
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Deliver every message twice
    #[arg(long)]
    duplicate: bool,

    /// Cut replica 0 off for the middle third of the script, then heal and catch up
    #[arg(long)]
    partition: bool,

    /// Save the first replica's checkpoint here afterwards
    #[arg(long)]
    save: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Toggle,
    Mark,
    Reset,
    Rename,
}

/// Step `k`'s replica, watch and action.
fn script(k: usize, seed: u64, replicas: usize, watches: usize) -> (usize, usize, Action) {
    let mixed = (k as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(seed);
    let action = match (mixed >> 32) % 8 {
        0..=3 => Action::Toggle,
        4 | 5 => Action::Mark,
        6 => Action::Reset,
        _ => Action::Rename,
    };
    (k % replicas, (mixed % watches as u64) as usize, action)
}

struct Replica {
    board: Board,
    clock: Arc<ManualClock>,
}

#[derive(Debug, Serialize, Tabled)]
struct WatchRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
    #[tabled(rename = "Events")]
    events: usize,
    #[tabled(rename = "Marks")]
    marks: usize,
    #[tabled(rename = "Agree")]
    agree: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    replicas: usize,
    steps: usize,
    converged: bool,
    hub: HubStats,
    watches: Vec<WatchRow>,
}

/// The replicated part of a board; selection and offset are per replica.
fn replicated(checkpoint: Checkpoint) -> Checkpoint {
    Checkpoint {
        offset: 0.0,
        selected: None,
        ..checkpoint
    }
}

async fn wait_converged(replicas: &[Replica], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let first = replicated(replicas[0].board.checkpoint());
        if replicas[1..]
            .iter()
            .all(|r| replicated(r.board.checkpoint()) == first)
        {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn execute(args: SimulateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let watches = args.watches.unwrap_or(config.replica.watch_count);
    if args.replicas < 2 {
        bail!("a simulation needs at least 2 replicas");
    }
    if watches == 0 {
        bail!("a board needs at least 1 watch");
    }

    let hub = MemoryHub::new(HubConfig {
        duplicate_delivery: args.duplicate || config.transport.duplicate_delivery,
        ..config.transport.hub_config()
    });
    let settle = config.transport.catch_up_timeout;
    let inhibitor = Arc::new(SuspendInhibitor::default());

    // Replica 0 starts the session; the rest align their offsets to it.
    let mut replicas: Vec<Replica> = Vec::with_capacity(args.replicas);
    for i in 0..args.replicas {
        let clock = ManualClock::new(1_000.0 + 37.5 * i as f64);
        let offset = ClockOffset::new(format!("replica{}", i), clock.clone());
        if let Some(initiator) = replicas.first() {
            offset.align_to(initiator.board.clock().shared_now());
        }
        let board = Board::new(Multiplexer::new(), offset, watches, inhibitor.clone())?;
        hub.join(board.multiplexer())?;
        replicas.push(Replica { board, clock });
    }
    hub.settle(settle).await;
    info!(replicas = args.replicas, watches = watches, "Simulation started");

    let (cut_from, cut_to) = (args.steps / 3, 2 * args.steps / 3);
    for k in 0..args.steps {
        if args.partition && k == cut_from {
            let isolated = replicas[0].board.multiplexer().peer_id();
            for other in &replicas[1..] {
                hub.partition(isolated, other.board.multiplexer().peer_id());
            }
        }
        if args.partition && k == cut_to {
            hub.heal_all();
            for replica in &replicas {
                replica.board.multiplexer().request_catch_up(settle).await;
            }
        }

        let (who, watch, action) = script(k, args.seed, args.replicas, watches);
        let board = &replicas[who].board;
        match action {
            Action::Toggle => {
                board.toggle(watch)?;
            }
            Action::Mark => {
                board.mark(watch)?;
            }
            Action::Reset => {
                board.reset(watch)?;
            }
            Action::Rename => {
                board.rename(watch, format!("Lap {} by r{}", k, who))?;
            }
        }

        for replica in &replicas {
            replica.clock.advance(args.interval);
        }
        hub.settle(settle).await;
    }

    let converged = hub.settle(settle).await && wait_converged(&replicas, settle).await;
    let reference = &replicas[0].board;
    let watch_rows = (0..watches)
        .map(|i| {
            let value = reference.state(i)?;
            Ok(WatchRow {
                index: i,
                name: reference.name(i)?,
                state: output::state_label(value.is_running()),
                elapsed: format_seconds(reference.elapsed(i)?),
                events: reference.watch(i)?.events().len(),
                marks: reference.marks(i)?.len(),
                agree: replicas[1..]
                    .iter()
                    .all(|r| r.board.state(i).ok() == Some(value)),
            })
        })
        .collect::<lapsync_core::Result<Vec<_>>>()?;

    if let Some(path) = &args.save {
        JsonFilePersistence::new(path)
            .save(&reference.checkpoint())
            .await?;
    }

    let report = SimulationReport {
        replicas: args.replicas,
        steps: args.steps,
        converged,
        hub: hub.stats(),
        watches: watch_rows,
    };

    match format {
        OutputFormat::Table => {
            output::print_list(&report.watches, format)?;
            output::print_header("Hub");
            output::print_detail("Messages sent", &report.hub.messages_sent.to_string());
            output::print_detail("Deliveries", &report.hub.deliveries.to_string());
            output::print_detail(
                "Blocked by partition",
                &report.hub.blocked_by_partition.to_string(),
            );
            output::print_detail("Lagged", &report.hub.lagged.to_string());
            println!();
            if converged {
                output::print_success(&format!(
                    "{} replicas converged after {} steps",
                    report.replicas, report.steps
                ));
            } else {
                output::print_error("Replicas did not converge");
            }
            if let Some(path) = &args.save {
                output::print_info(&format!("Checkpoint saved to {}", path.display()));
            }
        }
        _ => output::print_item(&report, format)?,
    }

    if !converged {
        bail!("replicas diverged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_deterministic_and_in_range() {
        for k in 0..100 {
            let (who, watch, _) = script(k, 7, 3, 4);
            assert_eq!(script(k, 7, 3, 4).0, who);
            assert!(who < 3);
            assert!(watch < 4);
        }
    }

    #[tokio::test]
    async fn test_small_session_converges() {
        let args = SimulateArgs {
            replicas: 3,
            watches: Some(2),
            steps: 30,
            interval: 0.5,
            seed: 1,
            duplicate: true,
            partition: true,
            save: None,
        };
        execute(args, &Config::default(), OutputFormat::Json)
            .await
            .unwrap();
    }
}
