use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use loregraph_server::{
    MemoryGraph,
    maintenance::{BatchDeleteReport, DEFAULT_ORPHAN_LIMIT, OrphanMode},
};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct OrphansCommand {
    #[clap(subcommand)]
    pub command: OrphansSubcommand,
}

#[derive(Subcommand)]
pub enum OrphansSubcommand {
    #[clap(about = "List states nothing points at")]
    States(ScanArgs),

    #[clap(about = "List entities without states or children")]
    Entities(LimitArgs),

    #[clap(about = "Delete orphan states, then the entities they leave empty")]
    Purge(PurgeArgs),
}

#[derive(Parser)]
pub struct ScanArgs {
    #[clap(
        long,
        short,
        default_value = "in_zero",
        help = "Orphan rule: in_zero (no inbound references) or all_zero (no references at all)"
    )]
    pub mode: String,

    #[clap(long, short, default_value_t = DEFAULT_ORPHAN_LIMIT, help = "Maximum number of results")]
    pub limit: usize,
}

#[derive(Parser)]
pub struct LimitArgs {
    #[clap(long, short, default_value_t = DEFAULT_ORPHAN_LIMIT, help = "Maximum number of results")]
    pub limit: usize,
}

#[derive(Parser)]
pub struct PurgeArgs {
    #[clap(flatten)]
    pub scan: ScanArgs,

    #[clap(long, help = "Only report what would be deleted")]
    pub dry_run: bool,
}

impl OrphansCommand {
    pub async fn execute(&self, graph: &MemoryGraph, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            OrphansSubcommand::States(args) => Self::states(graph, args, format).await,
            OrphansSubcommand::Entities(args) => Self::entities(graph, args, format).await,
            OrphansSubcommand::Purge(args) => Self::purge(graph, args, format).await,
        }
    }

    async fn states(graph: &MemoryGraph, args: &ScanArgs, format: OutputFormat) -> CliResult<()> {
        let mode: OrphanMode = args.mode.parse()?;
        let states = graph.find_orphan_states(mode, args.limit).await;

        match format {
            OutputFormat::Json => print_json(&states)?,
            OutputFormat::Table => {
                if states.is_empty() {
                    println!("No orphan states found ({mode}).");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["State", "Type", "Name", "Current", "Out", "Content", "Created"]);

                for state in &states {
                    table.add_row([
                        state.state_id.clone(),
                        state.entity_type.to_string(),
                        truncate_string(&state.name, 20),
                        if state.is_current { "yes" } else { "no" }.to_string(),
                        state.out_count.to_string(),
                        truncate_string(&state.content_snippet, 40),
                        format_timestamp(&state.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} orphan states ({mode})", states.len());
            }
        }

        Ok(())
    }

    async fn entities(graph: &MemoryGraph, args: &LimitArgs, format: OutputFormat) -> CliResult<()> {
        let entities = graph.find_orphan_entities(args.limit).await;

        match format {
            OutputFormat::Json => print_json(&entities)?,
            OutputFormat::Table => {
                if entities.is_empty() {
                    println!("No orphan entities found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Entity", "Type", "Hidden", "Parents", "Created"]);

                for entity in &entities {
                    table.add_row([
                        entity.entity_id.clone(),
                        entity.node_type.to_string(),
                        entity.hidden.to_string(),
                        entity.parent_count.to_string(),
                        format_timestamp(&entity.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} orphan entities", entities.len());
            }
        }

        Ok(())
    }

    async fn purge(graph: &MemoryGraph, args: &PurgeArgs, format: OutputFormat) -> CliResult<()> {
        let mode: OrphanMode = args.scan.mode.parse()?;
        let state_ids: Vec<String> = graph
            .find_orphan_states(mode, args.scan.limit)
            .await
            .into_iter()
            .map(|s| s.state_id)
            .collect();

        if args.dry_run {
            let entity_ids: Vec<String> = graph
                .find_orphan_entities(args.scan.limit)
                .await
                .into_iter()
                .map(|e| e.entity_id)
                .collect();
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "dry_run": true,
                    "mode": mode,
                    "states": state_ids,
                    "entities": entity_ids,
                }))?,
                OutputFormat::Table => {
                    println!("Dry run - would delete:");
                    println!("  States ({}): {}", state_ids.len(), state_ids.join(", "));
                    println!(
                        "  Entities already empty ({}): {}",
                        entity_ids.len(),
                        entity_ids.join(", ")
                    );
                }
            }
            return Ok(());
        }

        let states = if state_ids.is_empty() {
            BatchDeleteReport::default()
        } else {
            graph.delete_states_batch(&state_ids).await?
        };

        let entity_ids: Vec<String> = graph
            .find_orphan_entities(args.scan.limit)
            .await
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        let entities = if entity_ids.is_empty() {
            BatchDeleteReport::default()
        } else {
            graph.delete_entities_batch(&entity_ids).await?
        };

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "mode": mode,
                "states": states,
                "entities": entities,
            }))?,
            OutputFormat::Table => {
                println!("Purge Results");
                println!("=============\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Kind", "Deleted", "Failed"]);
                table.add_row([
                    "States",
                    &states.deleted_count.to_string(),
                    &states.failed_count.to_string(),
                ]);
                table.add_row([
                    "Entities",
                    &entities.deleted_count.to_string(),
                    &entities.failed_count.to_string(),
                ]);
                println!("{table}");

                for failure in states.failed.iter().chain(&entities.failed) {
                    println!("  {} ({}): {}", failure.id, failure.kind, failure.error);
                }
            }
        }

        Ok(())
    }
}
