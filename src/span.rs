use std::collections::{BTreeMap, HashSet};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// A single span of a Zipkin v2 trace. Field names follow the wire format
/// (camelCase JSON); timestamps and durations are epoch microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shared: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub timestamp: u64,
    pub value: String,
}

impl Span {
    /// Service that recorded the span: local endpoint first, remote as a
    /// fallback for one-sided spans.
    pub fn service_name(&self) -> Option<&str> {
        self.local_endpoint
            .as_ref()
            .and_then(|ep| ep.service_name.as_deref())
            .or_else(|| {
                self.remote_endpoint
                    .as_ref()
                    .and_then(|ep| ep.service_name.as_deref())
            })
            .filter(|name| !name.is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
    }

    /// Start plus duration; a span without a duration ends when it starts.
    pub fn end_timestamp(&self) -> Option<u64> {
        self.timestamp
            .map(|start| start.saturating_add(self.duration.unwrap_or(0)))
    }

    pub fn has_error(&self) -> bool {
        self.tags.contains_key("error")
    }
}

/// The full span set fetched for one trace id.
#[derive(Debug, Clone)]
pub struct Trace {
    pub trace_id: String,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(trace_id: impl Into<String>, spans: Vec<Span>) -> Self {
        Self {
            trace_id: trace_id.into(),
            spans,
        }
    }

    pub fn service_count(&self) -> usize {
        let services: HashSet<&str> = self
            .spans
            .iter()
            .filter_map(|span| span.service_name())
            .collect();
        services.len()
    }

    /// Wall-clock extent of the whole trace, earliest start to latest end.
    pub fn duration_micros(&self) -> Option<u64> {
        let min = self.spans.iter().filter_map(|span| span.timestamp).min()?;
        let max = self
            .spans
            .iter()
            .filter_map(|span| span.end_timestamp())
            .max()?;
        Some(max.saturating_sub(min))
    }
}

pub fn format_duration_micros(micros: u64) -> String {
    let micros = micros as f64;
    if micros < 1_000.0 {
        format!("{micros:.0}µs")
    } else if micros < 1_000_000.0 {
        format!("{:.2}ms", micros / 1_000.0)
    } else {
        format!("{:.2}s", micros / 1_000_000.0)
    }
}

pub fn format_timestamp_micros(micros: u64) -> String {
    match DateTime::from_timestamp_micros(micros as i64) {
        Some(when) => when.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => format!("{micros}µs"),
    }
}
