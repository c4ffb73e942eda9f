use std::process;
use std::sync::Mutex;

use anyhow::{bail, Result};
use clap::Args;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::args::BaseArgs;
use crate::config::Settings;
use crate::http::ApiClient;
use crate::links::{expand_trace_template, trace_api_path};
use crate::ui::{print_command_status, with_spinner, CommandStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub message: String,
    pub severity: Severity,
}

/// Where archive outcomes land. The terminal UI feeds these into its
/// status bar; the plain CLI prints them. Sinks cross task boundaries,
/// so they must be shareable between threads.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Copies a trace into the archive backend: fetch the raw span array,
/// tag the first parentless span with `zipkin.archived`, POST the array
/// to the configured endpoint. Emits exactly one alert and reports
/// whether the archive landed; all failure causes collapse into the
/// same generic alert.
pub async fn archive_trace(
    client: &ApiClient,
    trace_id: &str,
    post_url: &str,
    archive_url_template: Option<&str>,
    alerts: &dyn AlertSink,
) -> bool {
    match try_archive(client, trace_id, post_url).await {
        Ok(()) => {
            let message = match archive_url_template {
                Some(template) => format!(
                    "Archive successful! This trace is now accessible at {}",
                    expand_trace_template(template, trace_id)
                ),
                None => "Archive successful!".to_string(),
            };
            alerts.notify(Alert {
                message,
                severity: Severity::Success,
            });
            true
        }
        Err(_) => {
            alerts.notify(Alert {
                message: "Failed to archive the trace".to_string(),
                severity: Severity::Error,
            });
            false
        }
    }
}

async fn try_archive(client: &ApiClient, trace_id: &str, post_url: &str) -> Result<()> {
    let mut spans: Value = client.get_json(&trace_api_path(trace_id)).await?;
    tag_first_parentless_span(&mut spans)?;
    let status = client.post_json(post_url, &spans).await?;
    if status != StatusCode::OK && status != StatusCode::ACCEPTED {
        bail!("archive endpoint returned {status}");
    }
    Ok(())
}

/// Marks the first span without a `parentId` key as archived. A trace
/// with no parentless span is posted unmodified.
fn tag_first_parentless_span(spans: &mut Value) -> Result<()> {
    let Some(array) = spans.as_array_mut() else {
        bail!("trace endpoint did not return a span array");
    };
    for span in array {
        let Some(object) = span.as_object_mut() else {
            bail!("trace contains a non-object span");
        };
        if object.contains_key("parentId") {
            continue;
        }
        let tags = object
            .entry("tags")
            .or_insert_with(|| Value::Object(Map::new()));
        if tags.is_null() {
            *tags = Value::Object(Map::new());
        }
        let Some(tags) = tags.as_object_mut() else {
            bail!("span tags are not an object");
        };
        tags.insert("zipkin.archived".to_string(), Value::String("true".to_string()));
        break;
    }
    Ok(())
}

#[derive(Default)]
struct BufferedSink(Mutex<Vec<Alert>>);

impl BufferedSink {
    fn drain(&self) -> Vec<Alert> {
        match self.0.lock() {
            Ok(mut alerts) => alerts.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl AlertSink for BufferedSink {
    fn notify(&self, alert: Alert) {
        if let Ok(mut alerts) = self.0.lock() {
            alerts.push(alert);
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ArchiveArgs {
    /// Trace id to archive
    pub trace_id: String,
}

pub async fn run(base: BaseArgs, args: ArchiveArgs) -> Result<()> {
    let settings = Settings::resolve(&base)?;
    let Some(post_url) = settings.archive_post_url.clone() else {
        bail!(
            "No archive endpoint configured. Set one first: zlens config set archive_post_url <url>"
        );
    };
    let client = settings.client()?;

    // Alerts are buffered so the spinner line is gone before we print.
    let sink = BufferedSink::default();
    let archived = with_spinner(
        &format!("Archiving trace {}", args.trace_id),
        archive_trace(
            &client,
            &args.trace_id,
            &post_url,
            settings.archive_url.as_deref(),
            &sink,
        ),
    )
    .await;

    for alert in sink.drain() {
        if base.json {
            println!("{}", serde_json::to_string(&alert)?);
        } else {
            let status = match alert.severity {
                Severity::Success => CommandStatus::Success,
                Severity::Error => CommandStatus::Error,
            };
            print_command_status(status, &alert.message);
        }
    }

    if !archived {
        process::exit(1);
    }
    Ok(())
}
