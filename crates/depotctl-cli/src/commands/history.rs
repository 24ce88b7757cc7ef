use anyhow::Result;
use colored::Colorize;
use depotctl_core::history::HistoryRepository;
use depotctl_core::operation::Outcome;

use super::AppContext;

pub async fn show(ctx: &AppContext, limit: usize) -> Result<()> {
    let results = ctx.history.recent(limit).await?;
    if results.is_empty() {
        println!("No operations recorded yet.");
        return Ok(());
    }
    for result in results {
        let outcome = match &result.outcome {
            Outcome::Succeeded => "succeeded".green(),
            Outcome::Failed { reason } => format!("failed ({})", reason).red(),
            Outcome::TimedOut => "timed out".yellow(),
            Outcome::Cancelled => "cancelled".dimmed(),
        };
        let build = result
            .build_id
            .map(|id| format!(" build {}", id))
            .unwrap_or_default();
        println!(
            "{} {:<8} {:<20} {}{}",
            result.finished_at.format("%Y-%m-%d %H:%M:%S"),
            result.kind.to_string(),
            result.profile_name,
            outcome,
            build
        );
    }
    Ok(())
}
