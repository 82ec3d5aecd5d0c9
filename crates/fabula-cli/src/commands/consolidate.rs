use clap::Parser;
use fabula::MemoryManager;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ConsolidateCommand {
    #[clap(
        long,
        default_value = "cli",
        help = "Caller id recorded against the consolidation run"
    )]
    pub caller: String,

    #[clap(long, default_value = "5", help = "Admission priority (0-10)")]
    pub priority: u8,
}

impl ConsolidateCommand {
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        let outcome = manager
            .consolidate_with_priority(&self.caller, self.priority)
            .await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            OutputFormat::Table => {
                if !outcome.ran {
                    println!("Consolidation skipped: guard busy.");
                    return Ok(());
                }
                println!("Consolidation complete.");
                println!("  Promoted: {}", outcome.promoted);
                println!("  Merged:   {}", outcome.merged);
                println!("  Skipped:  {}", outcome.skipped);
            }
        }
        Ok(())
    }
}
