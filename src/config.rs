use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use std::{
    env, fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::args::BaseArgs;
use crate::http::{ApiClient, DEFAULT_API_URL};
use crate::ui::{print_command_status, CommandStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub logs_url: Option<String>,
    pub archive_post_url: Option<String>,
    pub archive_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const KNOWN_KEYS: &[&str] = &["api_url", "logs_url", "archive_post_url", "archive_url"];

impl Config {
    pub fn get_field(&self, key: &str) -> Option<&str> {
        match key {
            "api_url" => self.api_url.as_deref(),
            "logs_url" => self.logs_url.as_deref(),
            "archive_post_url" => self.archive_post_url.as_deref(),
            "archive_url" => self.archive_url.as_deref(),
            _ => None,
        }
    }

    pub fn set_field(&mut self, key: &str, value: String) -> bool {
        match key {
            "api_url" => self.api_url = Some(value),
            "logs_url" => self.logs_url = Some(value),
            "archive_post_url" => self.archive_post_url = Some(value),
            "archive_url" => self.archive_url = Some(value),
            _ => return false,
        }
        true
    }

    pub fn unset_field(&mut self, key: &str) -> bool {
        match key {
            "api_url" => self.api_url = None,
            "logs_url" => self.logs_url = None,
            "archive_post_url" => self.archive_post_url = None,
            "archive_url" => self.archive_url = None,
            _ => return false,
        }
        true
    }

    pub fn non_empty_fields(&self) -> Vec<(&str, &str)> {
        KNOWN_KEYS
            .iter()
            .filter_map(|&key| self.get_field(key).map(|v| (key, v)))
            .collect()
    }

    fn merge(&self, other: &Config) -> Config {
        let mut extra = self.extra.clone();
        extra.extend(other.extra.clone());
        Config {
            api_url: other.api_url.clone().or_else(|| self.api_url.clone()),
            logs_url: other.logs_url.clone().or_else(|| self.logs_url.clone()),
            archive_post_url: other
                .archive_post_url
                .clone()
                .or_else(|| self.archive_post_url.clone()),
            archive_url: other.archive_url.clone().or_else(|| self.archive_url.clone()),
            extra,
        }
    }
}

/// Fully resolved runtime settings: flags and env beat local config,
/// local config beats global, and the Zipkin default base URL backstops
/// everything.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub logs_url: Option<String>,
    pub archive_post_url: Option<String>,
    pub archive_url: Option<String>,
}

impl Settings {
    pub fn resolve(base: &BaseArgs) -> Result<Self> {
        Ok(resolve_from(base, &load()?))
    }

    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api_url)
    }
}

fn resolve_from(base: &BaseArgs, config: &Config) -> Settings {
    Settings {
        api_url: base
            .api_url
            .clone()
            .or_else(|| config.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        logs_url: base.logs_url.clone().or_else(|| config.logs_url.clone()),
        archive_post_url: base
            .archive_post_url
            .clone()
            .or_else(|| config.archive_post_url.clone()),
        archive_url: base
            .archive_url
            .clone()
            .or_else(|| config.archive_url.clone()),
    }
}

pub fn global_config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("zlens"));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join("zlens"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

pub fn global_path() -> Result<PathBuf> {
    Ok(global_config_dir()?.join("config.json"))
}

pub fn load_file(path: &Path) -> Config {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("Could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    let config: Config = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("Could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("Unknown config key {} in {}", key, path.display()),
        );
    }

    config
}

pub fn load_global() -> Result<Config> {
    Ok(load_file(&global_path()?))
}

pub fn load() -> Result<Config> {
    let global = load_global().unwrap_or_default();
    let local = match local_path() {
        Some(p) => load_file(&p),
        None => Config::default(),
    };
    Ok(global.merge(&local))
}

pub fn save_file(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

pub fn find_local_config_dir() -> Option<PathBuf> {
    let home = dirs::home_dir();
    let mut current_dir = std::env::current_dir().ok()?;

    loop {
        if current_dir.join(".zlens").is_dir() {
            return Some(current_dir.join(".zlens"));
        }
        if current_dir.join(".git").exists() {
            return None;
        }
        if Some(&current_dir) == home.as_ref() {
            return None;
        }
        if !current_dir.pop() {
            return None;
        }
    }
}

pub fn local_path() -> Option<PathBuf> {
    find_local_config_dir().map(|dir| dir.join("config.json"))
}

pub enum WriteTarget {
    Global(PathBuf),
    Local(PathBuf),
}

pub fn write_target() -> Result<WriteTarget> {
    match local_path() {
        Some(p) => Ok(WriteTarget::Local(p)),
        None => Ok(WriteTarget::Global(global_path()?)),
    }
}

/// Resolve which config file to write based on --global/--local flags.
pub fn resolve_write_path(global: bool, local: bool) -> Result<PathBuf> {
    if global {
        global_path()
    } else if local {
        match local_path() {
            Some(p) => Ok(p),
            None => {
                bail!("No local .zlens directory found. Create a .zlens directory in the project root first.")
            }
        }
    } else {
        match write_target()? {
            WriteTarget::Local(p) | WriteTarget::Global(p) => Ok(p),
        }
    }
}

// --- CLI commands ---

#[derive(Debug, Clone, Args)]
pub struct ScopeArgs {
    /// Apply to global config (~/.config/zlens/config.json)
    #[arg(long, short = 'g', conflicts_with = "local")]
    global: bool,

    /// Apply to local config (.zlens/config.json)
    #[arg(long, short = 'l')]
    local: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommands>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommands {
    /// List config values
    List {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Show config values grouped by source
        #[arg(long)]
        verbose: bool,
    },
    /// Get a config value
    Get {
        /// Config key (api_url, logs_url, archive_post_url, archive_url)
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Set a config value
    Set {
        /// Config key (api_url, logs_url, archive_post_url, archive_url)
        key: String,
        /// Value to set
        value: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove a config value
    Unset {
        /// Config key (api_url, logs_url, archive_post_url, archive_url)
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

fn validate_key(key: &str) -> Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        bail!(
            "Unknown config key: {key}\nValid keys: {}",
            KNOWN_KEYS.join(", ")
        );
    }
    Ok(())
}

pub fn run(base: BaseArgs, args: ConfigArgs) -> Result<()> {
    match args.command {
        None => run_list(base, false, false, false),
        Some(ConfigCommands::List { scope, verbose }) => {
            run_list(base, scope.global, scope.local, verbose)
        }
        Some(ConfigCommands::Get { key, scope }) => {
            validate_key(&key)?;
            run_get(base, &key, scope.global, scope.local)
        }
        Some(ConfigCommands::Set { key, value, scope }) => {
            validate_key(&key)?;
            run_set(&key, &value, scope.global, scope.local)
        }
        Some(ConfigCommands::Unset { key, scope }) => {
            validate_key(&key)?;
            run_unset(&key, scope.global, scope.local)
        }
    }
}

fn scoped_config(global: bool, local: bool) -> Result<Config> {
    if global {
        load_global()
    } else if local {
        Ok(local_path().map(|p| load_file(&p)).unwrap_or_default())
    } else {
        load()
    }
}

fn run_list(base: BaseArgs, global: bool, local: bool, verbose: bool) -> Result<()> {
    if verbose {
        return run_list_verbose(base, global, local);
    }

    let config = scoped_config(global, local)?;
    let output = format_resolved(&config, base.json)?;
    if !output.is_empty() {
        if base.json {
            // json goes to stdout so it can be piped to other tools
            println!("{output}");
        } else {
            eprintln!("{output}");
        }
    }

    Ok(())
}

fn format_resolved(config: &Config, json: bool) -> Result<String> {
    let fields = config.non_empty_fields();

    if json {
        let map: Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Ok(serde_json::to_string(&map)?)
    } else {
        Ok(fields
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn run_list_verbose(base: BaseArgs, global: bool, local: bool) -> Result<()> {
    let global_path = global_path().ok();
    let local_path = local_path();

    let global_cfg = if !local {
        global_path
            .as_ref()
            .map(|p| (p.display().to_string(), load_file(p)))
    } else {
        None
    };

    let local_cfg = if !global {
        local_path.as_ref().map(|p| {
            let display_path = std::env::current_dir()
                .ok()
                .and_then(|cwd| pathdiff::diff_paths(p, &cwd))
                .unwrap_or_else(|| p.clone())
                .display()
                .to_string();
            (display_path, load_file(p))
        })
    } else {
        None
    };

    let mut sources: Vec<(String, Vec<(&str, &str)>)> = Vec::new();

    if let Some((path, ref cfg)) = global_cfg {
        let fields = cfg.non_empty_fields();
        if !fields.is_empty() {
            sources.push((path, fields));
        }
    }

    if let Some((path, ref cfg)) = local_cfg {
        let fields = cfg.non_empty_fields();
        if !fields.is_empty() {
            sources.push((path, fields));
        }
    }

    let output = format_verbose(&sources, base.json)?;
    if !output.is_empty() {
        println!("{output}");
    }

    Ok(())
}

fn format_verbose(sources: &[(String, Vec<(&str, &str)>)], json: bool) -> Result<String> {
    if json {
        let mut map = Map::new();
        for (path, fields) in sources {
            let o: Map<String, Value> = fields
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect();
            map.insert(path.clone(), Value::Object(o));
        }
        Ok(serde_json::to_string(&map)?)
    } else {
        let mut parts = Vec::new();
        for (path, fields) in sources {
            let mut group = String::from(path.as_str());
            for (key, value) in fields {
                group.push_str(&format!("\n  {key}: {value}"));
            }
            parts.push(group);
        }
        Ok(parts.join("\n\n"))
    }
}

fn run_get(base: BaseArgs, key: &str, global: bool, local: bool) -> Result<()> {
    let cfg = scoped_config(global, local)?;

    match cfg.get_field(key) {
        Some(value) => {
            if base.json {
                println!("{}", serde_json::to_string(value)?);
            } else {
                println!("{value}");
            }
            Ok(())
        }
        None => {
            process::exit(1);
        }
    }
}

fn run_set(key: &str, value: &str, global: bool, local: bool) -> Result<()> {
    let path = resolve_write_path(global, local)?;
    let mut cfg = load_file(&path);

    cfg.set_field(key, value.to_string());

    save_file(&path, &cfg)?;

    print_command_status(CommandStatus::Success, &format!("Set {key} = {value}"));
    Ok(())
}

fn run_unset(key: &str, global: bool, local: bool) -> Result<()> {
    let path = resolve_write_path(global, local)?;
    let mut cfg = load_file(&path);

    cfg.unset_field(key);

    save_file(&path, &cfg)?;

    print_command_status(CommandStatus::Success, &format!("Unset {key}"));
    Ok(())
}
