pub mod commands;
pub mod error;
pub mod graph_file;
pub mod output;

pub use commands::{EdgeCommand, EntityCommand, OrphansCommand, ReviewCommand, StatsCommand};
pub use error::{CliError, CliResult};
pub use graph_file::GraphFile;
pub use output::{OutputFormat, format_timestamp, truncate_string};
