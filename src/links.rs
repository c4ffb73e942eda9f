/// Expands every `{traceId}` placeholder in a configured URL template.
pub fn expand_trace_template(template: &str, trace_id: &str) -> String {
    template.replace("{traceId}", trace_id)
}

/// Relative API path for fetching one trace by id.
pub fn trace_api_path(trace_id: &str) -> String {
    format!("api/v2/trace/{}", urlencoding::encode(trace_id))
}
