//! Reducer replay command.
//!
//! Folds a base value and a list of `TIME:KIND` events through the stopwatch
//! reducer and shows the state after each one.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use tabled::Tabled;

use lapsync_core::board::format_seconds;
use lapsync_core::events::{Aggregate, Event, EventKind, WatchState, WatchValue};
use lapsync_core::merge::normalize_by;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ReplayArgs {
    /// Events as TIME:KIND, e.g. 10:run 15.5:pause 20:reset
    #[arg(required = true)]
    events: Vec<String>,

    /// Base timeval (elapsed when paused, start time when running)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    base_time: f64,

    /// Base state
    #[arg(long, default_value = "paused")]
    base_state: BaseState,

    /// Also report the elapsed value at this shared time
    #[arg(long, allow_negative_numbers = true)]
    at: Option<f64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BaseState {
    Paused,
    Running,
}

impl From<BaseState> for WatchState {
    fn from(state: BaseState) -> Self {
        match state {
            BaseState::Paused => WatchState::Paused,
            BaseState::Running => WatchState::Running,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "Time")]
    timestamp: f64,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Timeval")]
    timeval: f64,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    base: WatchValue,
    steps: Vec<StepRow>,
    result: WatchValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_at: Option<f64>,
}

fn parse_event(text: &str) -> Result<Event> {
    let (time, kind) = text
        .split_once(':')
        .with_context(|| format!("event {:?} is not TIME:KIND", text))?;
    let timestamp: f64 = time
        .trim()
        .parse()
        .with_context(|| format!("bad timestamp in {:?}", text))?;
    if timestamp.is_nan() {
        bail!("timestamp in {:?} is NaN", text);
    }
    let kind: EventKind = kind.trim().parse()?;
    Ok(Event::new(timestamp, kind))
}

pub fn execute(args: ReplayArgs, format: OutputFormat) -> Result<()> {
    let parsed = args
        .events
        .iter()
        .map(String::as_str)
        .map(parse_event)
        .collect::<Result<Vec<_>>>()?;
    let given = parsed.len();
    // Same ordering and deduplication the replicated log applies.
    let events = normalize_by(parsed, Event::cmp);

    let base = WatchValue::new(args.base_time, args.base_state.into());
    let mut value = base;
    let steps: Vec<StepRow> = events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            value.apply(event);
            StepRow {
                step: i + 1,
                timestamp: event.timestamp,
                event: event.kind.to_string(),
                state: value.state.to_string(),
                timeval: value.timeval,
            }
        })
        .collect();

    let report = ReplayReport {
        base,
        steps,
        result: value,
        elapsed_at: args.at.map(|now| value.instantaneous(now)),
    };

    match format {
        OutputFormat::Table => {
            if events.len() < given {
                output::print_warning(&format!(
                    "{} duplicate event(s) collapsed",
                    given - events.len()
                ));
            }
            output::print_detail("Base", &base.to_string());
            output::print_list(&report.steps, format)?;
            output::print_header("Result");
            output::print_detail("State", &output::state_label(value.is_running()));
            output::print_detail("Timeval", &value.timeval.to_string());
            if let (Some(now), Some(elapsed)) = (args.at, report.elapsed_at) {
                output::print_detail(&format!("Elapsed at {}", now), &format_seconds(elapsed));
            }
        }
        _ => output::print_item(&report, format)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        let event = parse_event("15.5:pause").unwrap();
        assert_eq!(event, Event::pause(15.5));
        assert_eq!(parse_event(" 3 : RUN ").unwrap(), Event::run(3.0));
    }

    #[test]
    fn test_parse_event_rejects_garbage() {
        assert!(parse_event("15").is_err());
        assert!(parse_event("x:run").is_err());
        assert!(parse_event("1:jump").is_err());
        assert!(parse_event("NaN:run").is_err());
    }
}
