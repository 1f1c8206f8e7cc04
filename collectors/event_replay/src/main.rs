use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "event_replay", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17600
    #[arg(long, default_value = "http://127.0.0.1:17600")]
    core_url: String,

    /// JSON-lines file, one browser event per line (same shape as POST /event).
    #[arg(long)]
    file: PathBuf,

    /// Shift all `ts` values so the first event happens now.
    #[arg(long, default_value_t = false)]
    rebase: bool,

    /// Replay speed multiplier for the gaps between events. 0 posts back to back.
    #[arg(long, default_value_t = 0.0)]
    speed: f64,
}

#[derive(Deserialize)]
struct OkResponse<T> {
    ok: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct EventAck {
    #[serde(default)]
    redirect: Option<String>,
    #[serde(default)]
    recorded: Option<Value>,
}

/// Parses the non-empty, non-comment lines of `input`.
fn parse_events(input: &str) -> Vec<(usize, anyhow::Result<Value>)> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(|(i, line)| (i + 1, serde_json::from_str(line).map_err(anyhow::Error::from)))
        .collect()
}

fn event_ts(event: &Value) -> Option<i64> {
    event.get("ts").and_then(Value::as_i64)
}

/// Moves every `ts` by `shift` milliseconds.
fn rebase_events(events: &mut [Value], shift: i64) {
    for e in events.iter_mut() {
        if let Some(ts) = event_ts(e) {
            if let Some(obj) = e.as_object_mut() {
                obj.insert("ts".to_string(), Value::from(ts + shift));
            }
        }
    }
}

fn gap(prev: Option<i64>, next: Option<i64>, speed: f64) -> Option<Duration> {
    if speed <= 0.0 {
        return None;
    }
    let delta = next?.checked_sub(prev?)?;
    if delta <= 0 {
        return None;
    }
    Some(Duration::from_millis((delta as f64 / speed) as u64))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_replay=info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.file)?;

    let mut events = Vec::new();
    for (line_no, parsed) in parse_events(&raw) {
        match parsed {
            Ok(v) => events.push(v),
            Err(e) => warn!("line {line_no}: skipped ({e})"),
        }
    }
    if events.is_empty() {
        info!("no events in {}", args.file.display());
        return Ok(());
    }

    if args.rebase {
        if let Some(first) = events.iter().find_map(event_ts) {
            let shift = chrono::Utc::now().timestamp_millis() - first;
            rebase_events(&mut events, shift);
        }
    }

    let client = reqwest::Client::new();
    let endpoint = format!("{}/event", args.core_url.trim_end_matches('/'));
    info!("Replaying {} events to {endpoint}", events.len());

    let mut prev_ts = None;
    let mut posted = 0usize;
    for event in &events {
        if let Some(wait) = gap(prev_ts, event_ts(event), args.speed) {
            sleep(wait).await;
        }
        prev_ts = event_ts(event).or(prev_ts);

        let res = match client.post(&endpoint).json(event).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("post failed: {e}");
                continue;
            }
        };
        let body: OkResponse<EventAck> = match res.json().await {
            Ok(b) => b,
            Err(e) => {
                error!("bad response: {e}");
                continue;
            }
        };
        if !body.ok {
            warn!(
                "core rejected event: {}",
                body.error.as_deref().unwrap_or("unknown")
            );
            continue;
        }
        posted += 1;
        if let Some(ack) = body.data {
            if let Some(recorded) = ack.recorded {
                info!("recorded {recorded}");
            }
            if let Some(target) = ack.redirect {
                info!("redirect -> {target}");
            }
        }
    }

    info!("done: {posted}/{} events accepted", events.len());
    Ok(())
}
