use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use crate::args::BaseArgs;
use crate::config::Settings;
use crate::links::trace_api_path;
use crate::ui::{pluralize, print_command_status, with_spinner, CommandStatus};

#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    /// Trace id to download
    pub trace_id: String,

    /// Write to a file instead of stdout
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Fetches the raw span array for a trace, exactly as the backend
/// returns it, and prints or saves it.
pub async fn run(base: BaseArgs, args: DownloadArgs) -> Result<()> {
    let settings = Settings::resolve(&base)?;
    let client = settings.client()?;

    let spans: Value = with_spinner(
        &format!("Fetching trace {}", args.trace_id),
        client.get_json(&trace_api_path(&args.trace_id)),
    )
    .await?;

    let json = if base.json {
        serde_json::to_string(&spans)?
    } else {
        serde_json::to_string_pretty(&spans)?
    };

    match &args.output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            let count = spans.as_array().map(Vec::len).unwrap_or(0);
            print_command_status(
                CommandStatus::Success,
                &format!(
                    "Wrote {count} {} to {}",
                    pluralize(&count, "span", None),
                    path.display()
                ),
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}
