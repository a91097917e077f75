use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use loregraph_server::{MemoryGraph, review::ResourceType};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct ReviewCommand {
    #[clap(subcommand)]
    pub command: ReviewSubcommand,
}

#[derive(Subcommand)]
pub enum ReviewSubcommand {
    #[clap(about = "List open review sessions")]
    Sessions,

    #[clap(about = "List the snapshots pending in a session")]
    Snapshots(SessionArgs),

    #[clap(about = "Diff a resource against its snapshot")]
    Diff(ResourceArgs),

    #[clap(about = "Accept the current state of a resource")]
    Approve(ResourceArgs),

    #[clap(about = "Restore a resource to its snapshot")]
    Rollback(RollbackArgs),

    #[clap(about = "Approve everything in a session and close it")]
    Clear(SessionArgs),
}

#[derive(Parser)]
pub struct SessionArgs {
    #[clap(help = "Session ID")]
    pub session_id: String,
}

#[derive(Parser)]
pub struct ResourceArgs {
    #[clap(help = "Session ID")]
    pub session_id: String,

    #[clap(help = "Resource type (entity, direct_edge, relay_edge)")]
    pub resource_type: String,

    #[clap(help = "Entity ID or edge ID")]
    pub resource_id: String,
}

#[derive(Parser)]
pub struct RollbackArgs {
    #[clap(flatten)]
    pub resource: ResourceArgs,

    #[clap(long, help = "Task description stored on states the rollback writes")]
    pub task: Option<String>,
}

impl ResourceArgs {
    fn resource_type(&self) -> CliResult<ResourceType> {
        Ok(self.resource_type.parse()?)
    }
}

impl ReviewCommand {
    pub async fn execute(&self, graph: &MemoryGraph, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            ReviewSubcommand::Sessions => Self::sessions(graph, format).await,
            ReviewSubcommand::Snapshots(args) => Self::snapshots(graph, args, format).await,
            ReviewSubcommand::Diff(args) => Self::diff(graph, args, format).await,
            ReviewSubcommand::Approve(args) => Self::approve(graph, args, format).await,
            ReviewSubcommand::Rollback(args) => Self::rollback(graph, args, format).await,
            ReviewSubcommand::Clear(args) => Self::clear(graph, args, format).await,
        }
    }

    async fn sessions(graph: &MemoryGraph, format: OutputFormat) -> CliResult<()> {
        let sessions = graph.list_sessions().await;

        match format {
            OutputFormat::Json => print_json(&sessions)?,
            OutputFormat::Table => {
                if sessions.is_empty() {
                    println!("No open review sessions.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Session", "Resources", "Created"]);
                for session in &sessions {
                    table.add_row([
                        session.session_id.clone(),
                        session.resource_count.to_string(),
                        format_timestamp(&session.created_at),
                    ]);
                }
                println!("{table}");
            }
        }

        Ok(())
    }

    async fn snapshots(graph: &MemoryGraph, args: &SessionArgs, format: OutputFormat) -> CliResult<()> {
        let snapshots = graph.list_snapshots(&args.session_id).await?;

        match format {
            OutputFormat::Json => print_json(&snapshots)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Type", "Resource", "Operation", "Before", "Taken"]);
                for snapshot in &snapshots {
                    table.add_row([
                        snapshot.resource_type.to_string(),
                        snapshot.resource_id.clone(),
                        snapshot.operation_type.to_string(),
                        truncate_string(snapshot.snapshot_content.as_deref().unwrap_or("-"), 40),
                        format_timestamp(&snapshot.snapshot_time),
                    ]);
                }
                println!("{table}");
                println!("\nTotal: {} snapshots", snapshots.len());
            }
        }

        Ok(())
    }

    async fn diff(graph: &MemoryGraph, args: &ResourceArgs, format: OutputFormat) -> CliResult<()> {
        let report = graph
            .diff(&args.session_id, args.resource_type()?, &args.resource_id)
            .await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                println!("{} {} ({})", report.resource_type, report.resource_id, report.diff_summary);
                if report.has_changes {
                    println!("\n{}", report.diff_unified);
                }
            }
        }

        Ok(())
    }

    async fn approve(graph: &MemoryGraph, args: &ResourceArgs, format: OutputFormat) -> CliResult<()> {
        let outcome = graph
            .approve(&args.session_id, args.resource_type()?, &args.resource_id)
            .await?;

        match format {
            OutputFormat::Json => print_json(&outcome)?,
            OutputFormat::Table => println!("{}", outcome.message),
        }

        Ok(())
    }

    async fn rollback(graph: &MemoryGraph, args: &RollbackArgs, format: OutputFormat) -> CliResult<()> {
        let resource = &args.resource;
        let outcome = graph
            .rollback(
                &resource.session_id,
                resource.resource_type()?,
                &resource.resource_id,
                args.task.clone(),
            )
            .await?;

        match format {
            OutputFormat::Json => print_json(&outcome)?,
            OutputFormat::Table => match outcome.new_version {
                Some(version) => println!("{} (now at v{version})", outcome.message),
                None => println!("{}", outcome.message),
            },
        }

        Ok(())
    }

    async fn clear(graph: &MemoryGraph, args: &SessionArgs, format: OutputFormat) -> CliResult<()> {
        let outcome = graph.clear_session(&args.session_id).await?;

        match format {
            OutputFormat::Json => print_json(&outcome)?,
            OutputFormat::Table => println!("{}", outcome.message),
        }

        Ok(())
    }
}
