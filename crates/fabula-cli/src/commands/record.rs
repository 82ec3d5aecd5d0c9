use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use fabula::MemoryManager;
use fabula::memory::types::{MemoryTier, Record, RecordKind, RecordSource};
use fabula::storage::RecordFilter;
use uuid::Uuid;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct RecordCommand {
    #[clap(subcommand)]
    pub command: RecordSubcommand,
}

#[derive(Subcommand)]
pub enum RecordSubcommand {
    #[clap(about = "List records in a tier")]
    List(ListArgs),

    #[clap(about = "Show record details")]
    Show(ShowArgs),

    #[clap(about = "Delete a record")]
    Delete(DeleteArgs),

    #[clap(about = "Manually add a record to the Recent tier")]
    Add(AddArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "recent",
        help = "Tier to list (recent, derived, consolidated)"
    )]
    pub tier: String,

    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of records to display"
    )]
    pub limit: usize,

    #[clap(long, help = "Filter to records for this chapter")]
    pub chapter: Option<u32>,

    #[clap(long, help = "Filter to records mentioning this character id")]
    pub character: Option<String>,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Record ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(help = "Record ID to delete (UUID format)")]
    pub id: String,

    #[clap(
        long,
        short,
        default_value = "recent",
        help = "Tier to delete from (recent, derived, consolidated)"
    )]
    pub tier: String,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Record content text")]
    pub text: String,

    #[clap(
        long,
        default_value = "scene-summary",
        help = "Record kind (scene-summary, character-fact, plot-thread, world-detail, style-note)"
    )]
    pub kind: String,

    #[clap(long, default_value = "0.5", help = "Significance in [0.0, 1.0]")]
    pub significance: f32,

    #[clap(long, help = "Chapter number")]
    pub chapter: Option<u32>,

    #[clap(long, help = "Character id (repeatable)")]
    pub character: Vec<String>,
}

pub fn parse_tier(name: &str) -> CliResult<MemoryTier> {
    match name {
        "recent" => Ok(MemoryTier::Recent),
        "derived" => Ok(MemoryTier::Derived),
        "consolidated" => Ok(MemoryTier::Consolidated),
        other => {
            Err(format!("Unknown tier: {other}. Use recent, derived, or consolidated.").into())
        }
    }
}

fn parse_kind(name: &str) -> CliResult<RecordKind> {
    match name {
        "scene-summary" => Ok(RecordKind::SceneSummary),
        "character-fact" => Ok(RecordKind::CharacterFact),
        "plot-thread" => Ok(RecordKind::PlotThread),
        "world-detail" => Ok(RecordKind::WorldDetail),
        "style-note" => Ok(RecordKind::StyleNote),
        other => Err(format!(
            "Unknown record kind: {other}. Use scene-summary, character-fact, plot-thread, world-detail, or style-note."
        )
        .into()),
    }
}

impl RecordCommand {
    pub async fn execute(&self, manager: &MemoryManager, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            RecordSubcommand::List(args) => Self::list(manager, args, format),
            RecordSubcommand::Show(args) => Self::show(manager, args, format),
            RecordSubcommand::Delete(args) => Self::delete(manager, args, format).await,
            RecordSubcommand::Add(args) => Self::add(manager, args, format).await,
        }
    }

    fn list(manager: &MemoryManager, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let tier = parse_tier(&args.tier)?;

        let mut filter = RecordFilter::new();
        if let Some(chapter) = args.chapter {
            filter = filter.with_chapter(chapter);
        }
        if let Some(ref character) = args.character {
            filter = filter.with_character(character.clone());
        }

        let records: Vec<Record> = manager
            .query(tier, &filter)
            .into_iter()
            .take(args.limit)
            .collect();

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
            OutputFormat::Table => {
                if records.is_empty() {
                    println!("No records in the {tier} tier.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Kind", "Significance", "Chapter", "Created", "Content"]);

                for record in &records {
                    table.add_row([
                        record.id.to_string().chars().take(8).collect::<String>(),
                        format!("{:?}", record.kind),
                        format!("{:.2}", record.significance),
                        record
                            .chapter
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        format_timestamp(&record.created_at),
                        truncate_string(&record.content, 50),
                    ]);
                }
                println!("{table}");
            }
        }
        Ok(())
    }

    fn show(manager: &MemoryManager, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id =
            Uuid::parse_str(&args.id).map_err(|_| format!("Invalid record ID: {}", args.id))?;

        let record = MemoryTier::all()
            .into_iter()
            .find_map(|tier| manager.get(tier, id))
            .ok_or_else(|| format!("Record not found: {id}"))?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            OutputFormat::Table => {
                println!("ID:           {}", record.id);
                println!("Tier:         {}", record.tier);
                println!("Kind:         {:?}", record.kind);
                println!("Significance: {:.2}", record.significance);
                if let Some(chapter) = record.chapter {
                    println!("Chapter:      {chapter}");
                }
                if !record.characters.is_empty() {
                    println!("Characters:   {}", record.characters.join(", "));
                }
                println!("Created:      {}", format_timestamp(&record.created_at));
                println!("Updated:      {}", format_timestamp(&record.updated_at));
                println!("\n{}", record.content);
            }
        }
        Ok(())
    }

    async fn delete(
        manager: &MemoryManager,
        args: &DeleteArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let tier = parse_tier(&args.tier)?;
        let id =
            Uuid::parse_str(&args.id).map_err(|_| format!("Invalid record ID: {}", args.id))?;

        if !manager.delete(tier, id) {
            return Err(format!("Record not found in {tier} tier: {id}").into());
        }
        manager.save().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "deleted": id }));
            }
            OutputFormat::Table => {
                println!("Deleted record {id} from the {tier} tier.");
            }
        }
        Ok(())
    }

    async fn add(manager: &MemoryManager, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let kind = parse_kind(&args.kind)?;

        let mut record = Record::new(args.text.clone(), kind, RecordSource::Manual)
            .with_significance(args.significance)
            .with_characters(args.character.clone());
        if let Some(chapter) = args.chapter {
            record = record.with_chapter(chapter);
        }
        let id = record.id;

        manager.put(MemoryTier::Recent, record);
        manager.save().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "added": id }));
            }
            OutputFormat::Table => {
                println!("Added record {id} to the recent tier.");
            }
        }
        Ok(())
    }
}
