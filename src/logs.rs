use anyhow::{bail, Context, Result};
use clap::Args;

use crate::args::BaseArgs;
use crate::config::Settings;
use crate::links::expand_trace_template;
use crate::ui::{print_command_status, CommandStatus};

#[derive(Debug, Clone, Args)]
pub struct LogsArgs {
    /// Trace id to look up
    pub trace_id: String,

    /// Open the URL in the default browser instead of printing it
    #[arg(long)]
    pub open: bool,
}

/// Expands the configured logs URL template for one trace id.
pub fn run(base: BaseArgs, args: LogsArgs) -> Result<()> {
    let settings = Settings::resolve(&base)?;
    let Some(template) = settings.logs_url.as_deref() else {
        bail!("No logs URL configured. Set one first: zlens config set logs_url <url>");
    };
    let url = expand_trace_template(template, &args.trace_id);

    if args.open {
        open::that(&url).with_context(|| format!("failed to open {url}"))?;
        print_command_status(CommandStatus::Success, &format!("Opened {url}"));
    } else if base.json {
        println!("{}", serde_json::json!({ "url": url }));
    } else {
        println!("{url}");
    }
    Ok(())
}
