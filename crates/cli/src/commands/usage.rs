//! `switchyard usage` — Summarize recorded generation metrics.

use std::io::BufRead;
use switchyard_config::AppConfig;
use switchyard_telemetry::{GenerationMetric, MetricsSink, UsageLedger};

pub async fn run(recent: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let path = config.metrics_path();

    if !path.exists() {
        println!("No metrics recorded yet at {}", path.display());
        return Ok(());
    }

    let ledger = UsageLedger::with_capacity(recent.max(1));
    let mut skipped = 0;
    let reader = std::io::BufReader::new(std::fs::File::open(&path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerationMetric>(&line) {
            Ok(metric) => ledger.record(&metric)?,
            Err(_) => skipped += 1,
        }
    }

    println!("📊 Generation Usage ({})", path.display());
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "{:<24} {:>8} {:>10} {:>10} {:>9} {:>8}",
        "Model", "Requests", "Tokens", "Avg ms", "Avg diff", "Quality"
    );
    for usage in ledger.summary() {
        println!(
            "{:<24} {:>8} {:>10} {:>10.0} {:>9.1} {:>8}",
            usage.model_id,
            usage.requests,
            usage.tokens_used,
            usage.avg_latency_ms(),
            usage.avg_difficulty(),
            usage
                .avg_quality()
                .map(|q| format!("{q:.2}"))
                .unwrap_or_else(|| "-".into()),
        );
    }
    println!();
    println!("  {} generations total", ledger.total_requests());
    if skipped > 0 {
        println!("  ⚠️  {skipped} unreadable line(s) skipped");
    }

    if recent > 0 {
        println!();
        println!("  Most recent:");
        for m in ledger.recent(recent) {
            println!(
                "    {}  {:<20} d={:<3} {:<11} {}/{} tokens ({:.0}% of budget) {} ms",
                m.timestamp.format("%Y-%m-%d %H:%M:%S"),
                m.model_id,
                m.difficulty,
                m.query_type,
                m.tokens_used,
                m.max_tokens,
                m.budget_utilization() * 100.0,
                m.elapsed_ms,
            );
        }
    }

    Ok(())
}
