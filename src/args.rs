use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Override Zipkin API base URL (or via ZLENS_API_URL)
    #[arg(long, env = "ZLENS_API_URL", hide_env_values = true, global = true)]
    pub api_url: Option<String>,

    /// Logs URL template with a {traceId} placeholder (or via ZLENS_LOGS_URL)
    #[arg(long, env = "ZLENS_LOGS_URL", hide_env_values = true, global = true)]
    pub logs_url: Option<String>,

    /// Archive backend span endpoint (or via ZLENS_ARCHIVE_POST_URL)
    #[arg(
        long,
        env = "ZLENS_ARCHIVE_POST_URL",
        hide_env_values = true,
        global = true
    )]
    pub archive_post_url: Option<String>,

    /// Archive viewer URL template with a {traceId} placeholder (or via ZLENS_ARCHIVE_URL)
    #[arg(
        long,
        env = "ZLENS_ARCHIVE_URL",
        hide_env_values = true,
        global = true
    )]
    pub archive_url: Option<String>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "ZLENS_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
