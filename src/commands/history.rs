//! Latency history commands.

use anyhow::Result;

use crate::cli::HistoryAction;
use crate::history::{HistorySummary, LatencyHistory};
use crate::utils::format_latency_f64;

fn format_ms(value: Option<u32>) -> String {
    value
        .map(|v| format!("{}ms", v))
        .unwrap_or_else(|| "N/A".to_string())
}

fn print_summary(summary: &HistorySummary) {
    println!(
        "  {:<8} avg {:<9} min {:<7} max {:<7} ok {:>5.1}%  ({} samples)",
        summary.server_code,
        format_latency_f64(summary.avg_latency),
        format_ms(summary.min_latency),
        format_ms(summary.max_latency),
        summary.success_rate,
        summary.measurements
    );
}

/// Summaries for one server or all of them; returns how many were shown.
pub fn show(history: &mut LatencyHistory, code: Option<&str>) -> Result<usize> {
    let codes: Vec<String> = match code {
        Some(code) => vec![code.to_string()],
        None => history.all().keys().cloned().collect(),
    };

    let summaries: Vec<HistorySummary> = codes.iter().filter_map(|c| history.summary(c)).collect();
    if summaries.is_empty() {
        match code {
            Some(code) => anyhow::bail!("No latency history for {}", code),
            None => {
                println!("No latency history recorded yet. Run 'sdrpick ping' first.");
                return Ok(0);
            }
        }
    }

    println!("Latency History:");
    println!("{}", "-".repeat(70));
    for summary in &summaries {
        print_summary(summary);
    }
    Ok(summaries.len())
}

pub fn best(history: &mut LatencyHistory, count: usize) -> Vec<(String, f64)> {
    let best = history.best_servers(count);
    if best.is_empty() {
        println!("No latency history recorded yet. Run 'sdrpick ping' first.");
        return best;
    }
    println!("Best servers by average latency:");
    for (rank, (code, avg)) in best.iter().enumerate() {
        println!("  {:>2}. {:<8} {}", rank + 1, code, format_latency_f64(Some(*avg)));
    }
    best
}

pub fn clear(history: &mut LatencyHistory, code: Option<&str>) -> Result<()> {
    history.clear(code)?;
    match code {
        Some(code) => println!("Cleared latency history for {}", code),
        None => println!("Cleared all latency history"),
    }
    Ok(())
}

pub fn run(history: &mut LatencyHistory, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::Show { code } => show(history, code.as_deref()).map(|_| ()),
        HistoryAction::Best { count } => {
            best(history, count);
            Ok(())
        }
        HistoryAction::Clear { code } => clear(history, code.as_deref()),
    }
}
