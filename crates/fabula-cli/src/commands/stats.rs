use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use fabula::MemoryManager;
use fabula::memory::types::MemoryTier;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct StatsCommand {}

impl StatsCommand {
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        let recent = manager.len(MemoryTier::Recent);
        let derived = manager.len(MemoryTier::Derived);
        let consolidated = manager.len(MemoryTier::Consolidated);
        let guard = manager.stats();

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "total_records": recent + derived + consolidated,
                    "by_tier": {
                        "recent": recent,
                        "derived": derived,
                        "consolidated": consolidated,
                    },
                    "guard": guard,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Fabula Statistics");
                println!("======================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Tier", "Records"]);
                table.add_row(["Recent", &recent.to_string()]);
                table.add_row(["Derived", &derived.to_string()]);
                table.add_row(["Consolidated", &consolidated.to_string()]);
                println!("{table}\n");

                println!("Consolidation Guard");
                println!("----------------------");
                println!("Healthy:          {}", if guard.healthy { "yes" } else { "no" });
                println!("Successful runs:  {}", guard.successful_calls);
                println!("Blocked calls:    {}", guard.blocked_calls);
                println!("Failed calls:     {}", guard.failed_calls);
                println!("Timed-out runs:   {}", guard.timed_out_runs);
                println!("Force releases:   {}", guard.force_releases);
                println!("Peak depth:       {}", guard.peak_depth);
                println!("Avg duration:     {:.1} ms", guard.avg_duration_ms);
                println!("Queue length:     {}", guard.queue_length);

                if !guard.recommendations.is_empty() {
                    println!("\nRecommendations:");
                    for recommendation in &guard.recommendations {
                        println!("  - {recommendation}");
                    }
                }
            }
        }
        Ok(())
    }
}
