//! Checkpoint inspection command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use lapsync_core::board::{default_name, format_seconds, RECENT_MARKS};
use lapsync_core::clock::ClockOffset;
use lapsync_core::config::Config;
use lapsync_core::persistence::{Checkpoint, JsonFilePersistence, Persistence};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct InspectArgs {
    /// Checkpoint file; defaults to `persistence.path` from the configuration
    path: Option<PathBuf>,

    /// Number of most recent marks to list per watch
    #[arg(long, default_value_t = RECENT_MARKS)]
    marks: usize,
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
    #[tabled(rename = "Last Update")]
    last_update: String,
    #[tabled(rename = "Marks")]
    mark_count: usize,
    #[tabled(rename = "Recent")]
    recent: String,
}

fn rows(checkpoint: &Checkpoint, now: f64, recent: usize) -> Vec<WatchRow> {
    checkpoint
        .states
        .iter()
        .enumerate()
        .map(|(i, saved)| {
            let marks = checkpoint.marks.get(i).map(Vec::as_slice).unwrap_or(&[]);
            let shown = &marks[marks.len().saturating_sub(recent)..];
            WatchRow {
                index: i,
                name: checkpoint
                    .names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| default_name(i)),
                state: output::state_label(saved.value.is_running()),
                elapsed: format_seconds(saved.value.instantaneous(now)),
                last_update: if saved.last_update_time.is_finite() {
                    format!("{:.3}", saved.last_update_time)
                } else {
                    "never".to_string()
                },
                mark_count: marks.len(),
                recent: shown
                    .iter()
                    .map(|m| format_seconds(*m))
                    .collect::<Vec<_>>()
                    .join(" "),
            }
        })
        .collect()
}

pub async fn execute(args: InspectArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let path = args.path.unwrap_or_else(|| config.persistence.path.clone());
    let store = JsonFilePersistence::new(&path);

    let Some(checkpoint) = store.load().await? else {
        output::print_info(&format!("No checkpoint at {}", path.display()));
        return Ok(());
    };

    match format {
        OutputFormat::Table => {
            // Elapsed values are read on the checkpoint's own shared timeline.
            let clock = ClockOffset::system("inspect");
            clock.set_offset(checkpoint.offset);

            output::print_header(&format!("Checkpoint {}", path.display()));
            output::print_detail("Offset", &format!("{:+.3}s", checkpoint.offset));
            output::print_detail("Watches", &checkpoint.watch_count().to_string());
            output::print_detail(
                "Selected",
                &checkpoint
                    .selected
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            );
            println!();
            output::print_list(&rows(&checkpoint, clock.shared_now(), args.marks), format)?;
        }
        _ => output::print_item(&checkpoint, format)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapsync_core::events::WatchValue;
    use lapsync_core::persistence::WatchCheckpoint;

    #[test]
    fn test_rows() {
        let checkpoint = Checkpoint {
            offset: 0.0,
            names: vec!["Laps".into()],
            states: vec![
                WatchCheckpoint {
                    value: WatchValue::running(90.0),
                    last_update_time: 90.0,
                },
                WatchCheckpoint {
                    value: WatchValue::default(),
                    last_update_time: f64::NEG_INFINITY,
                },
            ],
            marks: vec![vec![1.0, 2.0, 3.0]],
            selected: None,
        };

        let rows = rows(&checkpoint, 100.0, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].elapsed, "10.00");
        assert_eq!(rows[0].recent, "2.00 3.00");
        assert_eq!(rows[0].mark_count, 3);
        assert_eq!(rows[1].name, "Stopwatch 2");
        assert_eq!(rows[1].last_update, "never");
        assert_eq!(rows[1].mark_count, 0);
    }
}
