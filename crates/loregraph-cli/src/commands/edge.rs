use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use loregraph_server::{MemoryGraph, review::WriteContext};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct EdgeCommand {
    #[clap(subcommand)]
    pub command: EdgeSubcommand,
}

#[derive(Subcommand)]
pub enum EdgeSubcommand {
    #[clap(about = "List the direct edges an entity holds")]
    List(ListArgs),

    #[clap(about = "Show a direct edge with its chapters")]
    Show(PairArgs),

    #[clap(about = "Delete a direct edge")]
    Delete(DeleteArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(help = "Viewer entity ID")]
    pub id: String,
}

#[derive(Parser)]
pub struct PairArgs {
    #[clap(help = "Viewer entity ID")]
    pub viewer_id: String,

    #[clap(help = "Target entity ID")]
    pub target_id: String,
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(flatten)]
    pub pair: PairArgs,

    #[clap(long, help = "Also unlink the edge's chapters")]
    pub force: bool,
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

impl EdgeCommand {
    pub async fn execute(&self, graph: &MemoryGraph, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            EdgeSubcommand::List(args) => Self::list(graph, args, format).await,
            EdgeSubcommand::Show(args) => Self::show(graph, args, format).await,
            EdgeSubcommand::Delete(args) => Self::delete(graph, args, format).await,
        }
    }

    async fn list(graph: &MemoryGraph, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let edges = graph.list_outbound_edges(&args.id).await?;

        match format {
            OutputFormat::Json => print_json(&edges)?,
            OutputFormat::Table => {
                if edges.is_empty() {
                    println!("{} holds no edges.", args.id);
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header([
                        "Edge", "Relation", "Target", "Pins", "Chapters", "Inheritable", "Updated",
                    ]);
                for edge in &edges {
                    table.add_row([
                        edge.edge_id.clone(),
                        edge.relation.clone(),
                        truncate_string(&edge.target_name, 20),
                        format!("v{} -> v{}", edge.viewer_version, edge.target_version),
                        edge.relay_count.to_string(),
                        yes_no(edge.inheritable),
                        format_timestamp(&edge.updated_at),
                    ]);
                }
                println!("{table}");
            }
        }

        Ok(())
    }

    async fn show(graph: &MemoryGraph, args: &PairArgs, format: OutputFormat) -> CliResult<()> {
        let relationship = graph
            .get_relationship(&args.viewer_id, &args.target_id)
            .await?;

        match format {
            OutputFormat::Json => print_json(&relationship)?,
            OutputFormat::Table => {
                let direct = &relationship.direct;
                println!(
                    "{} -[{}]-> {} (inheritable: {})",
                    direct.viewer_entity_id,
                    direct.relation,
                    direct.target_name,
                    yes_no(direct.inheritable)
                );
                println!("{}", direct.content);

                if !relationship.relays.is_empty() {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Chapter", "Relation", "Version", "Inheritable", "Content"]);
                    for relay in &relationship.relays {
                        table.add_row([
                            relay.chapter.clone(),
                            relay.relation.clone(),
                            format!("v{}", relay.chapter_version),
                            yes_no(relay.inheritable),
                            truncate_string(&relay.state.content, 40),
                        ]);
                    }
                    println!("\n{table}");
                }
            }
        }

        Ok(())
    }

    async fn delete(graph: &MemoryGraph, args: &DeleteArgs, format: OutputFormat) -> CliResult<()> {
        let deleted = graph
            .delete_direct_edge(
                &args.pair.viewer_id,
                &args.pair.target_id,
                args.force,
                &WriteContext::Untracked,
            )
            .await?;

        match format {
            OutputFormat::Json => print_json(&deleted)?,
            OutputFormat::Table => {
                println!("Edge {} deleted.", deleted.edge_id);
                if !deleted.removed_relay_links.is_empty() {
                    println!(
                        "Unlinked {} chapter(s); their states remain until purged.",
                        deleted.removed_relay_links.len()
                    );
                }
            }
        }

        Ok(())
    }
}
