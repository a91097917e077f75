use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use loregraph_server::{
    MemoryGraph,
    graph::{EntityInclude, NodeType},
};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct EntityCommand {
    #[clap(subcommand)]
    pub command: EntitySubcommand,
}

#[derive(Subcommand)]
pub enum EntitySubcommand {
    #[clap(about = "List visible entities")]
    List(ListArgs),

    #[clap(about = "Show an entity with its history, edges and children")]
    Show(ShowArgs),

    #[clap(about = "Show every state of an entity")]
    History(ShowArgs),

    #[clap(about = "Delete an entity that no longer has states")]
    Delete(ShowArgs),

    #[clap(about = "Delete a single unreferenced state")]
    DeleteState(DeleteStateArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "50",
        help = "Maximum number of entities to display"
    )]
    pub limit: usize,

    #[clap(
        long,
        short,
        help = "Filter by node type (character, location, faction, event, item, relationship)"
    )]
    pub r#type: Option<String>,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Entity ID")]
    pub id: String,
}

#[derive(Parser)]
pub struct DeleteStateArgs {
    #[clap(help = "State ID (entity_v<version>)")]
    pub state_id: String,
}

impl EntityCommand {
    pub async fn execute(&self, graph: &MemoryGraph, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            EntitySubcommand::List(args) => Self::list(graph, args, format).await,
            EntitySubcommand::Show(args) => Self::show(graph, args, format).await,
            EntitySubcommand::History(args) => Self::history(graph, args, format).await,
            EntitySubcommand::Delete(args) => Self::delete(graph, args, format).await,
            EntitySubcommand::DeleteState(args) => Self::delete_state(graph, args, format).await,
        }
    }

    async fn list(graph: &MemoryGraph, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let type_filter: Option<NodeType> = args
            .r#type
            .as_deref()
            .map(str::parse::<NodeType>)
            .transpose()?;

        let mut entries = graph.catalog().await;
        if let Some(node_type) = type_filter {
            entries.retain(|e| e.node_type == node_type);
        }
        entries.truncate(args.limit);

        match format {
            OutputFormat::Json => print_json(&entries)?,
            OutputFormat::Table => {
                if entries.is_empty() {
                    println!("No entities found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Type", "Name", "Version", "Edges"]);

                for entry in &entries {
                    let edges: Vec<String> = entry
                        .edges
                        .iter()
                        .map(|e| format!("{} -> {}", e.relation, e.target_name))
                        .collect();
                    table.add_row([
                        entry.entity_id.clone(),
                        entry.node_type.to_string(),
                        truncate_string(&entry.name, 30),
                        entry.version.to_string(),
                        truncate_string(&edges.join(", "), 50),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} entities", entries.len());
            }
        }

        Ok(())
    }

    async fn show(graph: &MemoryGraph, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let view = graph.get_entity(&args.id, EntityInclude::all()).await?;

        match format {
            OutputFormat::Json => print_json(&view)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID", &view.entity_id]);
                table.add_row(["Type", &view.node_type.to_string()]);
                table.add_row(["Name", view.name.as_deref().unwrap_or("-")]);
                table.add_row(["Content", view.content.as_deref().unwrap_or("-")]);
                table.add_row([
                    "Version",
                    &view.version.map_or_else(|| "-".to_string(), |v| v.to_string()),
                ]);
                table.add_row(["In / Out", &format!("{} / {}", view.in_count, view.out_count)]);
                table.add_row(["Created", &view.created_at.to_rfc3339()]);
                table.add_row(["Parents", &view.parents.join(", ")]);
                table.add_row(["States", &view.history.len().to_string()]);
                table.add_row([
                    "Children",
                    &view
                        .children
                        .iter()
                        .map(|c| c.entity_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]);

                println!("{table}");

                if !view.edges.is_empty() {
                    let mut edges = Table::new();
                    edges
                        .load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Relation", "Target", "Pinned", "Chapters", "Inheritable", "Content"]);
                    for edge in &view.edges {
                        edges.add_row([
                            edge.relation.clone(),
                            edge.target_name.clone(),
                            format!("v{}", edge.target_version),
                            edge.relay_count.to_string(),
                            if edge.inheritable { "yes" } else { "no" }.to_string(),
                            truncate_string(&edge.content, 40),
                        ]);
                    }
                    println!("\n{edges}");
                }
            }
        }

        Ok(())
    }

    async fn history(graph: &MemoryGraph, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let history = graph.list_history(&args.id).await?;

        match format {
            OutputFormat::Json => print_json(&history)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["State", "Name", "Content", "In", "Out", "Created"]);

                for state in &history {
                    table.add_row([
                        state.state_id.clone(),
                        truncate_string(&state.name, 20),
                        truncate_string(&state.content, 40),
                        state.in_count.to_string(),
                        state.out_count.to_string(),
                        format_timestamp(&state.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} states", history.len());
            }
        }

        Ok(())
    }

    async fn delete(graph: &MemoryGraph, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let deleted = graph.delete_entity(&args.id).await?;

        match format {
            OutputFormat::Json => print_json(&deleted)?,
            OutputFormat::Table => println!("Entity {} deleted.", args.id),
        }

        Ok(())
    }

    async fn delete_state(
        graph: &MemoryGraph,
        args: &DeleteStateArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let deleted = graph.delete_state(&args.state_id).await?;

        match format {
            OutputFormat::Json => print_json(&deleted)?,
            OutputFormat::Table => println!("State {} deleted.", args.state_id),
        }

        Ok(())
    }
}
