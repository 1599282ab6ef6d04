use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Connects to a running hub and reports per-kind message rates.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Hub WebSocket URL
    #[clap(short, long, default_value = "ws://127.0.0.1:8081/ws")]
    url: String,

    /// Identity sent as X-User-ID
    #[clap(short, long, default_value = "hub-listener")]
    identity: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct EnvelopeKind {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Default)]
struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Utc>>,
    kind_timestamps: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
}

impl Stats {
    fn record(&mut self, kind: String) {
        let now = Utc::now();
        self.global_timestamps.push_back(now);
        self.kind_timestamps.entry(kind).or_default().push_back(now);
    }

    /// Drops entries older than one minute and returns (global, per-kind DESC).
    fn rates(&mut self) -> (usize, Vec<(String, usize)>) {
        let one_minute_ago = Utc::now() - Duration::minutes(1);
        while self.global_timestamps.front().is_some_and(|&t| t < one_minute_ago) {
            self.global_timestamps.pop_front();
        }
        let mut rates: Vec<(String, usize)> = Vec::new();
        for (kind, dq) in self.kind_timestamps.iter_mut() {
            while dq.front().is_some_and(|&t| t < one_minute_ago) {
                dq.pop_front();
            }
            if !dq.is_empty() {
                rates.push((kind.clone(), dq.len()));
            }
        }
        rates.sort_by(|a, b| b.1.cmp(&a.1));
        (self.global_timestamps.len(), rates)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let interval = std::time::Duration::from_secs(args.report_interval_seconds.max(1));
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            let (global_rate, rates) = match stats_reporter.lock() {
                Ok(mut data) => data.rates(),
                Err(_) => break,
            };

            let report = rates
                .iter()
                .map(|(k, r)| format!("{k}: {r} msg/min"))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("Global rate: {global_rate} msg/min");
            println!("Kinds: {}", if report.is_empty() { "No data" } else { &report });
            println!("----------------------------\n");
        }
    });

    let mut request = args.url.as_str().into_client_request().context("invalid hub url")?;
    request
        .headers_mut()
        .insert("X-User-ID", HeaderValue::from_str(&args.identity).context("invalid identity")?);

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(request).await.context("failed to connect to hub")?;
    let (_write, mut read) = ws_stream.split();
    println!("Connected as {}. Press Ctrl+C to stop.", args.identity);

    // Pings are answered by tungstenite while we keep reading.
    while let Some(msg) = read.next().await {
        match msg.context("hub connection failed")? {
            Message::Text(text) => {
                if let Ok(parsed) = serde_json::from_str::<EnvelopeKind>(&text) {
                    if parsed.kind == "welcome" {
                        println!("Welcome: {text}");
                    }
                    if let Ok(mut data) = stats.lock() {
                        data.record(parsed.kind);
                    }
                }
            }
            Message::Close(frame) => {
                println!("Hub closed the session: {frame:?}");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_sorted_by_volume() {
        let mut stats = Stats::default();
        stats.record("stream_update".into());
        stats.record("stream_update".into());
        stats.record("welcome".into());
        let (global, rates) = stats.rates();
        assert_eq!(global, 3);
        assert_eq!(rates[0], ("stream_update".to_string(), 2));
        assert_eq!(rates[1], ("welcome".to_string(), 1));
    }
}
