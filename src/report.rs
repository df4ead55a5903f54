//! Human-readable report rendering
//!
//! Two sections, one per tier. Realtime entries are ranked by ping,
//! streaming entries by their best transfer rate with a ten-cell bar
//! scaled to the fastest entry.

use crate::proxy::{ClassifiedProxies, ClassifiedProxy};
use std::cmp::Ordering;

const LATENCIES_PER_LINE: usize = 6;
const BAR_LENGTH: usize = 10;
const BAR_FILL: &str = "■";
const BAR_EMPTY: &str = "□";

/// Render both tiers as one report, realtime first
pub fn render_report(proxies: &ClassifiedProxies) -> String {
    format!(
        "{}\n\n{}",
        render_realtime(&proxies.realtime),
        render_streaming(&proxies.streaming)
    )
}

/// Latency-ranked section
pub fn render_realtime(proxies: &[ClassifiedProxy]) -> String {
    if proxies.is_empty() {
        return "No real-time proxies available".to_string();
    }

    let mut sorted: Vec<&ClassifiedProxy> = proxies.iter().collect();
    sorted.sort_by(|a, b| {
        a.result
            .latency
            .partial_cmp(&b.result.latency)
            .unwrap_or(Ordering::Equal)
    });

    let mut lines = vec![format!(
        "🚀 Real-time Proxies • {} total • ⚡ By ping\n",
        proxies.len()
    )];

    let latencies: Vec<String> = sorted
        .iter()
        .map(|proxy| format!("{}ms", proxy.result.latency_ms().unwrap_or(0)))
        .collect();
    for group in latencies.chunks(LATENCIES_PER_LINE) {
        lines.push(group.join(" • "));
    }

    lines.push("\n🔄 Hourly updates".to_string());
    lines.join("\n")
}

/// Speed-ranked section
pub fn render_streaming(proxies: &[ClassifiedProxy]) -> String {
    if proxies.is_empty() {
        return "No streaming proxies available".to_string();
    }

    let mut sorted: Vec<&ClassifiedProxy> = proxies.iter().collect();
    sorted.sort_by(|a, b| {
        b.result
            .best_throughput()
            .partial_cmp(&a.result.best_throughput())
            .unwrap_or(Ordering::Equal)
    });

    let mut lines = vec![format!(
        "📥 Streaming Proxies • {} total • 💫 By speed\n",
        proxies.len()
    )];

    let max_speed = sorted
        .iter()
        .map(|proxy| proxy.result.best_throughput())
        .fold(0.0_f64, f64::max);

    for proxy in &sorted {
        let speed = proxy.result.best_throughput();
        let speed_mbps = speed / (1024.0 * 1024.0);
        // Unmeasured sets get an empty bar instead of a zero division
        let fill_count = if max_speed > 0.0 {
            (((speed / max_speed) * BAR_LENGTH as f64).round() as usize).min(BAR_LENGTH)
        } else {
            0
        };
        let bar = format!(
            "{}{}",
            BAR_FILL.repeat(fill_count),
            BAR_EMPTY.repeat(BAR_LENGTH - fill_count)
        );
        lines.push(format!("{:4.1} MB/s {}", speed_mbps, bar));
    }

    lines.push("\n🔄 Hourly updates".to_string());
    lines.join("\n")
}

/// Format a transfer rate as a human readable string
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec == 0.0 {
        return "0 B/s".to_string();
    }

    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut speed = bytes_per_sec;
    let mut unit = 0;
    while speed >= 1024.0 && unit < UNITS.len() - 1 {
        speed /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", speed, UNITS[unit])
}
