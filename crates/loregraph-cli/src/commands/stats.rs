use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use loregraph_server::MemoryGraph;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct StatsCommand {}

impl StatsCommand {
    pub async fn execute(&self, graph: &MemoryGraph, format: OutputFormat) -> CliResult<()> {
        let stats = graph.stats().await;

        match format {
            OutputFormat::Json => print_json(&stats)?,
            OutputFormat::Table => {
                println!("Loregraph Statistics");
                println!("====================\n");

                let counts = &stats.graph;
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Metric", "Count"]);

                table.add_row(["Entities", &counts.entities.to_string()]);
                table.add_row(["  of which relay chapters", &counts.hidden_entities.to_string()]);
                table.add_row(["States", &counts.states.to_string()]);
                table.add_row(["Direct edges", &counts.direct_edges.to_string()]);
                table.add_row(["Relay links", &counts.relay_links.to_string()]);
                table.add_row(["Parent links", &counts.parent_links.to_string()]);
                table.add_row(["Review sessions", &stats.sessions.to_string()]);
                table.add_row(["Pending snapshots", &stats.pending_snapshots.to_string()]);

                println!("{table}");
            }
        }

        Ok(())
    }
}
