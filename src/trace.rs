use std::fs;
use std::io;
use std::io::IsTerminal;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::Frame;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span as UiSpan};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, TableState,
    Wrap,
};
use ratatui::Terminal;
use serde_json::json;
use unicode_width::UnicodeWidthStr;

use crate::archive::{archive_trace, Alert, AlertSink, Severity};
use crate::args::BaseArgs;
use crate::config::Settings;
use crate::http::ApiClient;
use crate::links::{expand_trace_template, trace_api_path};
use crate::span::{format_duration_micros, format_timestamp_micros, Endpoint, Span, Trace};
use crate::tree::{
    ancestor_ids, build_span_tree, max_depth, parent_span_ids, visible_rows, CollapsedSet,
    SpanNode, SpanRow, TimestampBounds,
};
use crate::ui::{
    apply_column_padding, header, pluralize, styled_table, truncate_to_width, with_spinner,
};

const LOADER_DELAY: Duration = Duration::from_millis(250);
const MIN_ZOOM_WINDOW_MICROS: u64 = 16;
const MAX_INDENT_DEPTH: usize = 16;

type TraceLoadResult = (String, Result<Vec<Span>>);

#[derive(Debug, Clone, Args)]
pub struct TraceArgs {
    /// Trace id to view
    pub trace_id: String,

    /// Show only the subtree under this span id
    #[arg(long, value_name = "SPAN_ID")]
    pub reroot: Option<String>,

    /// Collapse these span ids before projecting rows (repeatable)
    #[arg(long, value_name = "SPAN_ID")]
    pub collapse: Vec<String>,

    /// Print rows and exit instead of entering the viewer
    #[arg(long)]
    pub non_interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Timeline,
    SpanTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaneFocus {
    Tree,
    Detail,
}

struct TimelineApp {
    trace_id: String,
    trace: Trace,
    roots: Vec<SpanNode>,
    /// Rows currently projected for the timeline (collapse and reroot applied).
    rows: Vec<SpanRow>,
    /// Every span in pre-order, for the span table.
    all_rows: Vec<SpanRow>,
    bounds: Option<TimestampBounds>,
    /// Zoom window over `bounds`; None means the full trace extent.
    window: Option<(u64, u64)>,
    collapsed: CollapsedSet,
    reroot_span_id: Option<String>,
    selected: usize,
    screen: Screen,
    table_selected: usize,
    detail_open: bool,
    pane_focus: PaneFocus,
    detail_scroll: u16,
    minimap_open: bool,
    status: String,
    status_is_error: bool,
    logs_url_template: Option<String>,
    archive_post_url: Option<String>,
    archive_url_template: Option<String>,
    alerts_tx: Sender<Alert>,
    alerts_rx: Receiver<Alert>,
    trace_load_rx: Option<Receiver<TraceLoadResult>>,
    trace_load_started_at: Option<Instant>,
    spinner_tick: usize,
}

struct ChannelSink(Sender<Alert>);

impl AlertSink for ChannelSink {
    fn notify(&self, alert: Alert) {
        let _ = self.0.send(alert);
    }
}

impl TimelineApp {
    fn new(trace_id: String, spans: Vec<Span>, settings: &Settings) -> Self {
        let (alerts_tx, alerts_rx) = mpsc::channel();
        let mut app = Self {
            trace: Trace::new(trace_id.clone(), spans),
            trace_id,
            roots: Vec::new(),
            rows: Vec::new(),
            all_rows: Vec::new(),
            bounds: None,
            window: None,
            collapsed: CollapsedSet::new(),
            reroot_span_id: None,
            selected: 0,
            screen: Screen::Timeline,
            table_selected: 0,
            detail_open: false,
            pane_focus: PaneFocus::Tree,
            detail_scroll: 0,
            minimap_open: false,
            status: String::new(),
            status_is_error: false,
            logs_url_template: settings.logs_url.clone(),
            archive_post_url: settings.archive_post_url.clone(),
            archive_url_template: settings.archive_url.clone(),
            alerts_tx,
            alerts_rx,
            trace_load_rx: None,
            trace_load_started_at: None,
            spinner_tick: 0,
        };
        app.rebuild_tree();
        let hint = app.timeline_hint();
        app.set_status(hint);
        app
    }

    fn set_status<S: Into<String>>(&mut self, status: S) {
        self.status = status.into();
        self.status_is_error = false;
    }

    fn set_error<S: Into<String>>(&mut self, status: S) {
        self.status = status.into();
        self.status_is_error = true;
    }

    fn selected_row(&self) -> Option<&SpanRow> {
        self.rows.get(self.selected)
    }

    fn rebuild_tree(&mut self) {
        self.roots = build_span_tree(&self.trace.spans);
        self.all_rows = visible_rows(&self.roots, &CollapsedSet::new(), None).0;
        self.refresh_rows();
    }

    /// Recomputes the projected rows after any collapse/reroot/data change.
    /// Selection sticks to the same span id when it is still visible; the
    /// zoom window resets whenever the visible bounds move, matching what
    /// a changed timeline extent implies.
    fn refresh_rows(&mut self) {
        let selected_id = self.selected_row().map(|row| row.span.id.clone());
        let (rows, bounds) = visible_rows(
            &self.roots,
            &self.collapsed,
            self.reroot_span_id.as_deref(),
        );
        self.rows = rows;
        if bounds != self.bounds {
            self.bounds = bounds;
            self.window = None;
        }
        if let Some(span_id) = selected_id {
            if let Some(pos) = self.rows.iter().position(|row| row.span.id == span_id) {
                self.selected = pos;
            }
        }
        if self.selected >= self.rows.len() {
            self.selected = self.rows.len().saturating_sub(1);
        }
        if self.table_selected >= self.all_rows.len() {
            self.table_selected = self.all_rows.len().saturating_sub(1);
        }
    }

    fn replace_spans(&mut self, spans: Vec<Span>) {
        self.trace = Trace::new(self.trace_id.clone(), spans);
        self.rebuild_tree();
    }

    fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.detail_scroll = 0;
        }
    }

    fn move_down(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
            self.detail_scroll = 0;
        }
    }

    fn move_top(&mut self) {
        self.selected = 0;
        self.detail_scroll = 0;
    }

    fn move_bottom(&mut self) {
        self.selected = self.rows.len().saturating_sub(1);
        self.detail_scroll = 0;
    }

    fn toggle_selected_collapsed(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };
        if !row.has_children {
            return;
        }
        let span_id = row.span.id.clone();
        let now_closed = self.collapsed.toggle(&span_id);
        self.refresh_rows();
        if now_closed {
            self.set_status(format!("Collapsed {span_id}"));
        } else {
            self.set_status(format!("Expanded {span_id}"));
        }
    }

    fn collapse_all(&mut self) {
        for span_id in parent_span_ids(&self.roots) {
            self.collapsed.close(&span_id);
        }
        self.refresh_rows();
        self.set_status("Collapsed all spans");
    }

    fn expand_all(&mut self) {
        self.collapsed.clear();
        self.refresh_rows();
        self.set_status("Expanded all spans");
    }

    fn reroot_to_selected(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };
        let span_id = row.span.id.clone();
        self.reroot_span_id = Some(span_id.clone());
        self.refresh_rows();
        self.set_status(format!("Showing subtree of {span_id}  Backspace: full trace"));
    }

    fn clear_reroot(&mut self) {
        if self.reroot_span_id.take().is_some() {
            self.refresh_rows();
            self.set_status("Showing full trace");
        }
    }

    /// Selects a span in the timeline, opening every collapsed ancestor
    /// on the way there.
    fn jump_to_span(&mut self, span_id: &str) {
        if let Some(ancestors) = ancestor_ids(&self.roots, span_id) {
            for ancestor in &ancestors {
                self.collapsed.open(ancestor);
            }
        }
        self.refresh_rows();
        match self.rows.iter().position(|row| row.span.id == span_id) {
            Some(pos) => self.selected = pos,
            None => {
                // Target sits outside the current reroot subtree.
                self.reroot_span_id = None;
                self.refresh_rows();
                if let Some(pos) = self.rows.iter().position(|row| row.span.id == span_id) {
                    self.selected = pos;
                }
            }
        }
        self.detail_scroll = 0;
        self.screen = Screen::Timeline;
    }

    fn open_span_table(&mut self) {
        if let Some(row) = self.selected_row() {
            let span_id = row.span.id.clone();
            if let Some(pos) = self
                .all_rows
                .iter()
                .position(|candidate| candidate.span.id == span_id)
            {
                self.table_selected = pos;
            }
        }
        self.screen = Screen::SpanTable;
        self.set_status("Up/Down: move  Enter: open in timeline  Esc: back");
    }

    fn effective_window(&self) -> Option<(u64, u64)> {
        self.window
            .or_else(|| self.bounds.map(|bounds| (bounds.min, bounds.max)))
    }

    fn zoom_in(&mut self) {
        let Some(bounds) = self.bounds else {
            return;
        };
        let (min, max) = self.window.unwrap_or((bounds.min, bounds.max));
        let width = max.saturating_sub(min);
        if width <= MIN_ZOOM_WINDOW_MICROS {
            return;
        }
        let quarter = (width / 4).max(1);
        self.window = Some((min + quarter, max - quarter));
        let status = self.window_status();
        self.set_status(status);
    }

    fn zoom_out(&mut self) {
        let Some(bounds) = self.bounds else {
            return;
        };
        let Some((min, max)) = self.window else {
            return;
        };
        let width = max.saturating_sub(min).max(1);
        let half = width / 2;
        let new_min = min.saturating_sub(half).max(bounds.min);
        let new_max = max.saturating_add(half).min(bounds.max);
        if new_min <= bounds.min && new_max >= bounds.max {
            self.window = None;
        } else {
            self.window = Some((new_min, new_max));
        }
        let status = self.window_status();
        self.set_status(status);
    }

    fn reset_zoom(&mut self) {
        self.window = None;
        self.set_status("Zoom reset to full trace");
    }

    fn window_status(&self) -> String {
        match (self.window, self.bounds) {
            (Some((min, max)), Some(bounds)) => format!(
                "Zoom +{} .. +{} of {}",
                format_duration_micros(min.saturating_sub(bounds.min)),
                format_duration_micros(max.saturating_sub(bounds.min)),
                format_duration_micros(bounds.width()),
            ),
            _ => "Zoom reset to full trace".to_string(),
        }
    }

    fn open_logs(&mut self) {
        let Some(template) = self.logs_url_template.clone() else {
            self.set_status("Logs URL is not configured (set logs_url)");
            return;
        };
        let url = expand_trace_template(&template, &self.trace_id);
        match open::that(&url) {
            Ok(()) => self.set_status(format!("Opened {url}")),
            Err(err) => self.set_error(format!("Failed to open {url}: {err}")),
        }
    }

    fn save_trace_json(&mut self) {
        let path = format!("trace-{}.json", self.trace_id);
        let result = serde_json::to_string_pretty(&self.trace.spans)
            .map_err(anyhow::Error::from)
            .and_then(|json| fs::write(&path, format!("{json}\n")).map_err(anyhow::Error::from));
        match result {
            Ok(()) => {
                let count = self.trace.spans.len();
                self.set_status(format!(
                    "Wrote {count} {} to {path}",
                    pluralize(&count, "span", None)
                ));
            }
            Err(err) => self.set_error(format!("Failed to write {path}: {err}")),
        }
    }

    fn summary_text(&self) -> String {
        let span_count = self.trace.spans.len();
        let service_count = self.trace.service_count();
        let mut parts = vec![
            format!("{span_count} {}", pluralize(&span_count, "span", None)),
            format!(
                "{service_count} {}",
                pluralize(&service_count, "service", None)
            ),
            format!("depth {}", max_depth(&self.roots)),
        ];
        if let Some(duration) = self.trace.duration_micros() {
            parts.push(format_duration_micros(duration));
        }
        parts.join("    ")
    }

    fn timeline_hint(&self) -> String {
        let mut hint = String::from(
            "Up/Down: move  Space: collapse  Enter: reroot  d: detail  t: table  m: minimap  +/-/0: zoom  w: save  r: refresh",
        );
        if self.logs_url_template.is_some() {
            hint.push_str("  o: logs");
        }
        if self.archive_post_url.is_some() {
            hint.push_str("  a: archive");
        }
        hint.push_str("  q: quit");
        hint
    }
}

pub async fn run(base: BaseArgs, args: TraceArgs) -> Result<()> {
    let settings = Settings::resolve(&base)?;
    let client = settings.client()?;

    let interactive = !base.json && std::io::stdin().is_terminal() && !args.non_interactive;

    let spans = with_spinner(
        &format!("Loading trace {}...", args.trace_id),
        fetch_trace(&client, &args.trace_id),
    )
    .await?;
    if spans.is_empty() {
        bail!("no spans found for trace {}", args.trace_id);
    }

    let mut app = TimelineApp::new(args.trace_id.clone(), spans, &settings);
    if args.reroot.is_some() {
        app.reroot_span_id = args.reroot.clone();
    }
    for span_id in &args.collapse {
        app.collapsed.close(span_id);
    }
    app.refresh_rows();

    if interactive {
        let handle = tokio::runtime::Handle::current();
        return tokio::task::block_in_place(|| run_interactive_blocking(app, client, handle));
    }

    if base.json {
        print_rows_json(&app)?;
    } else {
        print_rows_table(&app);
    }
    Ok(())
}

async fn fetch_trace(client: &ApiClient, trace_id: &str) -> Result<Vec<Span>> {
    let spans: Vec<Span> = client
        .get_json(&trace_api_path(trace_id))
        .await
        .with_context(|| format!("failed to fetch trace {trace_id}"))?;
    Ok(spans)
}

fn print_rows_json(app: &TimelineApp) -> Result<()> {
    let payload = json!({
        "traceId": app.trace_id,
        "spanCount": app.trace.spans.len(),
        "serviceCount": app.trace.service_count(),
        "depth": max_depth(&app.roots),
        "durationMicros": app.trace.duration_micros(),
        "bounds": app.bounds,
        "rows": app.rows,
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn print_rows_table(app: &TimelineApp) {
    let mut table = styled_table();
    table.set_header(vec![
        header("SERVICE"),
        header("SPAN"),
        header("START"),
        header("DURATION"),
        header("SPAN ID"),
    ]);
    apply_column_padding(&mut table, (0, 2));

    let trace_start = app.bounds.map(|bounds| bounds.min);
    for row in &app.rows {
        let indent = "  ".repeat(row.depth.min(MAX_INDENT_DEPTH));
        table.add_row(vec![
            row.span.service_name().unwrap_or("-").to_string(),
            format!("{indent}{}", row.span.display_name()),
            start_offset_text(&row.span, trace_start),
            row.span
                .duration
                .map(format_duration_micros)
                .unwrap_or_else(|| "-".to_string()),
            row.span.id.clone(),
        ]);
    }
    println!("{table}");
}

fn start_offset_text(span: &Span, trace_start: Option<u64>) -> String {
    match (span.timestamp, trace_start) {
        (Some(timestamp), Some(start)) => {
            format!("+{}", format_duration_micros(timestamp.saturating_sub(start)))
        }
        _ => "-".to_string(),
    }
}

fn run_interactive_blocking(
    mut app: TimelineApp,
    client: ApiClient,
    handle: tokio::runtime::Handle,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, client, handle);

    disable_raw_mode().ok();
    terminal.backend_mut().execute(LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TimelineApp,
    client: ApiClient,
    handle: tokio::runtime::Handle,
) -> Result<()> {
    loop {
        poll_alerts(app);
        poll_pending_trace_load(app);
        terminal.draw(|frame| draw_ui(frame, app))?;

        if event::poll(Duration::from_millis(200))? {
            match event::read()? {
                Event::Key(key) => {
                    if handle_key_event(app, key, &client, &handle) {
                        break;
                    }
                }
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }

    Ok(())
}

fn poll_alerts(app: &mut TimelineApp) {
    loop {
        match app.alerts_rx.try_recv() {
            Ok(alert) => match alert.severity {
                Severity::Success => app.set_status(alert.message),
                Severity::Error => app.set_error(alert.message),
            },
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

fn start_archive(app: &mut TimelineApp, client: &ApiClient, handle: &tokio::runtime::Handle) {
    let Some(post_url) = app.archive_post_url.clone() else {
        app.set_status("Archive is not configured (set archive_post_url)");
        return;
    };
    let tx = app.alerts_tx.clone();
    let client = client.clone();
    let trace_id = app.trace_id.clone();
    let archive_url_template = app.archive_url_template.clone();

    handle.spawn(async move {
        let sink = ChannelSink(tx);
        let _ = archive_trace(
            &client,
            &trace_id,
            &post_url,
            archive_url_template.as_deref(),
            &sink,
        )
        .await;
    });

    app.set_status(format!("Archiving trace {}...", app.trace_id));
}

fn start_trace_reload(app: &mut TimelineApp, client: &ApiClient, handle: &tokio::runtime::Handle) {
    if app.trace_load_rx.is_some() {
        return;
    }
    let (tx, rx) = mpsc::channel();
    let client = client.clone();
    let trace_id = app.trace_id.clone();

    handle.spawn(async move {
        let result = fetch_trace(&client, &trace_id).await;
        let _ = tx.send((trace_id, result));
    });

    app.trace_load_rx = Some(rx);
    app.trace_load_started_at = Some(Instant::now());
    app.spinner_tick = 0;
    app.set_status(format!("Refreshing trace {}...", app.trace_id));
}

fn poll_pending_trace_load(app: &mut TimelineApp) {
    if app.trace_load_rx.is_none() {
        return;
    }

    app.spinner_tick = app.spinner_tick.wrapping_add(1);
    if !app.status_is_error
        && app
            .trace_load_started_at
            .map(|start| start.elapsed() >= LOADER_DELAY)
            .unwrap_or(false)
    {
        app.set_status(format!(
            "Refreshing trace {} {}",
            app.trace_id,
            spinner_char(app.spinner_tick)
        ));
    }

    let recv_result = app.trace_load_rx.as_ref().map(|rx| rx.try_recv());
    let Some(recv_result) = recv_result else {
        return;
    };

    match recv_result {
        Ok((trace_id, result)) => {
            app.trace_load_rx = None;
            app.trace_load_started_at = None;
            match result {
                Ok(spans) if spans.is_empty() => {
                    app.set_status(format!("No spans found for trace {trace_id}"));
                }
                Ok(spans) => {
                    let count = spans.len();
                    app.replace_spans(spans);
                    app.set_status(format!(
                        "Loaded {count} {}",
                        pluralize(&count, "span", None)
                    ));
                }
                Err(err) => {
                    app.set_error(format!(
                        "Failed to refresh trace {trace_id}: {}",
                        root_error_message(&err)
                    ));
                }
            }
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.trace_load_rx = None;
            app.trace_load_started_at = None;
            app.set_error("Failed to refresh trace: request channel closed");
        }
    }
}

/// Returns true when the app should quit.
fn handle_key_event(
    app: &mut TimelineApp,
    key: KeyEvent,
    client: &ApiClient,
    handle: &tokio::runtime::Handle,
) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Esc => {
            if app.screen == Screen::SpanTable {
                app.screen = Screen::Timeline;
                let hint = app.timeline_hint();
                app.set_status(hint);
                return false;
            }
            if app.detail_open && app.pane_focus == PaneFocus::Detail {
                app.pane_focus = PaneFocus::Tree;
                return false;
            }
            if app.reroot_span_id.is_some() {
                app.clear_reroot();
                return false;
            }
            return true;
        }
        _ => {}
    }

    match app.screen {
        Screen::Timeline => handle_timeline_key(app, key, client, handle),
        Screen::SpanTable => handle_span_table_key(app, key),
    }
    false
}

fn handle_timeline_key(
    app: &mut TimelineApp,
    key: KeyEvent,
    client: &ApiClient,
    handle: &tokio::runtime::Handle,
) {
    if app.detail_open && app.pane_focus == PaneFocus::Detail {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                app.detail_scroll = app.detail_scroll.saturating_sub(1)
            }
            KeyCode::Down | KeyCode::Char('j') => {
                app.detail_scroll = app.detail_scroll.saturating_add(1)
            }
            KeyCode::PageUp => app.detail_scroll = app.detail_scroll.saturating_sub(10),
            KeyCode::PageDown => app.detail_scroll = app.detail_scroll.saturating_add(10),
            KeyCode::Char('g') => app.detail_scroll = 0,
            KeyCode::Left | KeyCode::Char('h') => app.pane_focus = PaneFocus::Tree,
            KeyCode::Char('d') => {
                app.detail_open = false;
                app.pane_focus = PaneFocus::Tree;
            }
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Up | KeyCode::Char('k') => app.move_up(),
        KeyCode::Down | KeyCode::Char('j') => app.move_down(),
        KeyCode::Char('g') => app.move_top(),
        KeyCode::Char('G') => app.move_bottom(),
        KeyCode::Char(' ') => app.toggle_selected_collapsed(),
        KeyCode::Char('C') => app.collapse_all(),
        KeyCode::Char('E') => app.expand_all(),
        KeyCode::Enter => app.reroot_to_selected(),
        KeyCode::Backspace => app.clear_reroot(),
        KeyCode::Char('d') => {
            app.detail_open = !app.detail_open;
            app.pane_focus = PaneFocus::Tree;
            app.detail_scroll = 0;
        }
        KeyCode::Right | KeyCode::Char('l') if app.detail_open => {
            app.pane_focus = PaneFocus::Detail;
        }
        KeyCode::Char('m') => app.minimap_open = !app.minimap_open,
        KeyCode::Char('t') => app.open_span_table(),
        KeyCode::Char('+') | KeyCode::Char('=') => app.zoom_in(),
        KeyCode::Char('-') => app.zoom_out(),
        KeyCode::Char('0') => app.reset_zoom(),
        KeyCode::Char('a') => start_archive(app, client, handle),
        KeyCode::Char('o') => app.open_logs(),
        KeyCode::Char('w') => app.save_trace_json(),
        KeyCode::Char('r') => start_trace_reload(app, client, handle),
        _ => {}
    }
}

fn handle_span_table_key(app: &mut TimelineApp, key: KeyEvent) {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => {
            if app.table_selected > 0 {
                app.table_selected -= 1;
            }
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if app.table_selected + 1 < app.all_rows.len() {
                app.table_selected += 1;
            }
        }
        KeyCode::Char('g') => app.table_selected = 0,
        KeyCode::Char('G') => app.table_selected = app.all_rows.len().saturating_sub(1),
        KeyCode::Enter => {
            if let Some(row) = app.all_rows.get(app.table_selected) {
                let span_id = row.span.id.clone();
                app.jump_to_span(&span_id);
                app.set_status(format!("Jumped to {span_id}"));
            }
        }
        KeyCode::Char('t') | KeyCode::Backspace => {
            app.screen = Screen::Timeline;
            let hint = app.timeline_hint();
            app.set_status(hint);
        }
        _ => {}
    }
}

fn draw_ui(frame: &mut Frame<'_>, app: &TimelineApp) {
    let mut constraints = vec![Constraint::Length(3)];
    if app.minimap_open {
        constraints.push(Constraint::Length(3));
    }
    constraints.push(Constraint::Min(5));
    constraints.push(Constraint::Length(3));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(frame.area());

    draw_header(frame, chunks[0], app);

    let body_index = if app.minimap_open {
        draw_minimap(frame, chunks[1], app);
        2
    } else {
        1
    };

    match app.screen {
        Screen::Timeline => draw_timeline(frame, chunks[body_index], app),
        Screen::SpanTable => draw_span_table(frame, chunks[body_index], app),
    }

    draw_status(frame, chunks[body_index + 1], app);
}

fn draw_header(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let mut spans = vec![
        UiSpan::styled(
            app.trace_id.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        UiSpan::styled("    ", Style::default().fg(Color::DarkGray)),
        UiSpan::styled(app.summary_text(), Style::default().fg(Color::Gray)),
    ];
    if let Some(reroot) = &app.reroot_span_id {
        spans.push(UiSpan::styled(
            format!("    subtree of {reroot}"),
            Style::default().fg(Color::Yellow),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title("zlens trace"),
    );
    frame.render_widget(header, area);
}

fn draw_minimap(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let inner_width = area.width.saturating_sub(2) as usize;
    let line = minimap_line(app.bounds, app.window, inner_width);
    let title = match app.window {
        Some(_) => "Mini Timeline [zoomed]",
        None => "Mini Timeline",
    };

    let minimap = Paragraph::new(Line::from(UiSpan::styled(
        line,
        Style::default().fg(Color::Cyan),
    )))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(title),
    );
    frame.render_widget(minimap, area);
}

fn minimap_line(
    bounds: Option<TimestampBounds>,
    window: Option<(u64, u64)>,
    width: usize,
) -> String {
    let Some(bounds) = bounds else {
        return " ".repeat(width);
    };
    if width == 0 {
        return String::new();
    }
    let (window_min, window_max) = window.unwrap_or((bounds.min, bounds.max));
    let full_width = bounds.width().max(1) as f64;
    (0..width)
        .map(|cell| {
            let at = bounds.min + ((cell as f64 + 0.5) / width as f64 * full_width) as u64;
            if at >= window_min && at <= window_max {
                '█'
            } else {
                '░'
            }
        })
        .collect()
}

fn draw_timeline(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let chunks = if app.detail_open {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area)
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(100)])
            .split(area)
    };

    draw_timeline_list(frame, chunks[0], app);
    if app.detail_open {
        draw_detail(frame, chunks[1], app);
    }
}

fn draw_timeline_list(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let tree_is_focused = !app.detail_open || app.pane_focus == PaneFocus::Tree;
    let title = if app.detail_open && tree_is_focused {
        "Timeline [active]"
    } else {
        "Timeline"
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(if tree_is_focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        })
        .title_bottom("Space collapse/expand  Enter reroot  C/E all  Left/Right switch pane");

    if app.rows.is_empty() {
        let empty = Paragraph::new("No spans to display.").block(block);
        frame.render_widget(empty, area);
        return;
    }

    let inner_width = area.width.saturating_sub(2) as usize;
    let duration_width = 10usize;
    let name_width = (inner_width * 45 / 100).min(inner_width.saturating_sub(duration_width + 1));
    let bar_width = inner_width.saturating_sub(name_width + duration_width + 1);

    let window = app.effective_window();
    let items: Vec<ListItem<'_>> = app
        .rows
        .iter()
        .map(|row| {
            ListItem::new(timeline_row_line(
                row,
                app.collapsed.is_closed(&row.span.id),
                window,
                name_width,
                bar_width,
            ))
        })
        .collect();

    let list = List::new(items).block(block).highlight_style(
        Style::default()
            .bg(Color::Rgb(42, 47, 56))
            .add_modifier(Modifier::BOLD),
    );

    let mut list_state = ListState::default();
    list_state.select(Some(app.selected.min(app.rows.len() - 1)));
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn timeline_row_line(
    row: &SpanRow,
    is_collapsed: bool,
    window: Option<(u64, u64)>,
    name_width: usize,
    bar_width: usize,
) -> Line<'static> {
    let indent = "  ".repeat(row.depth.min(MAX_INDENT_DEPTH));
    let marker = if row.has_children {
        if is_collapsed {
            "▸"
        } else {
            "▾"
        }
    } else {
        "·"
    };
    let service = row.span.service_name().unwrap_or("-");
    let label = format!("{indent}{marker} [{service}] {}", row.span.display_name());

    let mut spans = vec![UiSpan::raw(pad_to_width(&label, name_width))];

    if bar_width > 0 {
        let segment = window.and_then(|(window_min, window_max)| {
            let start = row.span.timestamp?;
            let end = row.span.end_timestamp()?;
            bar_segment(start, end, window_min, window_max, bar_width)
        });
        match segment {
            Some((offset, len)) => {
                let color = if row.span.has_error() {
                    Color::Red
                } else {
                    Color::Cyan
                };
                spans.push(UiSpan::raw(" ".repeat(offset)));
                spans.push(UiSpan::styled(
                    "▇".repeat(len),
                    Style::default().fg(color),
                ));
                spans.push(UiSpan::raw(
                    " ".repeat(bar_width.saturating_sub(offset + len)),
                ));
            }
            None => spans.push(UiSpan::raw(" ".repeat(bar_width))),
        }
    }

    let duration = row
        .span
        .duration
        .map(format_duration_micros)
        .unwrap_or_default();
    spans.push(UiSpan::styled(
        format!(" {duration:>9}"),
        Style::default().fg(Color::DarkGray),
    ));

    Line::from(spans)
}

/// Maps a span onto the bar area: (cell offset, cell length). None when
/// the span has no overlap with the window.
fn bar_segment(
    span_start: u64,
    span_end: u64,
    window_min: u64,
    window_max: u64,
    width: usize,
) -> Option<(usize, usize)> {
    if width == 0 || window_max <= window_min {
        return None;
    }
    let start = span_start.max(window_min);
    let end = span_end.min(window_max);
    if end < start {
        return None;
    }
    let window_width = (window_max - window_min) as f64;
    let cells = width as f64;
    let left = ((start - window_min) as f64 / window_width * cells).floor() as usize;
    let right = ((end - window_min) as f64 / window_width * cells).ceil() as usize;
    let left = left.min(width - 1);
    let right = right.clamp(left + 1, width);
    Some((left, right - left))
}

fn pad_to_width(text: &str, width: usize) -> String {
    let mut out = truncate_to_width(text, width);
    let current = UnicodeWidthStr::width(out.as_str());
    out.push_str(&" ".repeat(width.saturating_sub(current)));
    out
}

fn draw_detail(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let detail_is_focused = app.pane_focus == PaneFocus::Detail;
    let title = if detail_is_focused {
        "Span Detail [active]"
    } else {
        "Span Detail"
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(if detail_is_focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        })
        .title_bottom("Up/Down scroll  Left back  d close");

    let lines = app
        .selected_row()
        .map(span_detail_lines)
        .unwrap_or_else(|| vec![Line::from("No span selected")]);

    let detail = Paragraph::new(lines)
        .block(block)
        .scroll((app.detail_scroll, 0))
        .wrap(Wrap { trim: false });
    frame.render_widget(detail, area);
}

fn span_detail_lines(row: &SpanRow) -> Vec<Line<'static>> {
    let span = &row.span;
    let mut lines = vec![detail_line("Span ID", span.id.clone())];
    if !span.trace_id.is_empty() {
        lines.push(detail_line("Trace ID", span.trace_id.clone()));
    }
    if let Some(parent) = &span.parent_id {
        lines.push(detail_line("Parent ID", parent.clone()));
    }
    lines.push(detail_line("Name", span.display_name().to_string()));
    if let Some(kind) = &span.kind {
        lines.push(detail_line("Kind", kind.clone()));
    }
    if let Some(endpoint) = &span.local_endpoint {
        lines.push(detail_line("Local", endpoint_label(endpoint)));
    }
    if let Some(endpoint) = &span.remote_endpoint {
        lines.push(detail_line("Remote", endpoint_label(endpoint)));
    }
    if let Some(timestamp) = span.timestamp {
        lines.push(detail_line("Start", format_timestamp_micros(timestamp)));
    }
    if let Some(duration) = span.duration {
        lines.push(detail_line("Duration", format_duration_micros(duration)));
    }
    if span.shared {
        lines.push(detail_line("Shared", "true".to_string()));
    }
    if span.debug {
        lines.push(detail_line("Debug", "true".to_string()));
    }

    if !span.annotations.is_empty() {
        lines.push(Line::from(""));
        lines.push(section_line("Annotations"));
        for annotation in &span.annotations {
            let at = match span.timestamp {
                Some(start) if annotation.timestamp >= start => {
                    format!("+{}", format_duration_micros(annotation.timestamp - start))
                }
                _ => format_timestamp_micros(annotation.timestamp),
            };
            lines.push(detail_line(&at, annotation.value.clone()));
        }
    }

    if !span.tags.is_empty() {
        lines.push(Line::from(""));
        lines.push(section_line("Tags"));
        for (key, value) in &span.tags {
            lines.push(detail_line(key, value.clone()));
        }
    }

    lines
}

fn detail_line(key: &str, value: String) -> Line<'static> {
    Line::from(vec![
        UiSpan::styled(format!("{key}: "), Style::default().fg(Color::DarkGray)),
        UiSpan::raw(value),
    ])
}

fn section_line(title: &str) -> Line<'static> {
    Line::from(UiSpan::styled(
        title.to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    ))
}

fn endpoint_label(endpoint: &Endpoint) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = &endpoint.service_name {
        if !name.is_empty() {
            parts.push(name.clone());
        }
    }
    let address = endpoint
        .ipv4
        .clone()
        .or_else(|| endpoint.ipv6.clone());
    match (address, endpoint.port) {
        (Some(address), Some(port)) => parts.push(format!("{address}:{port}")),
        (Some(address), None) => parts.push(address),
        (None, Some(port)) => parts.push(format!(":{port}")),
        (None, None) => {}
    }
    if parts.is_empty() {
        "unknown".to_string()
    } else {
        parts.join(" ")
    }
}

fn draw_span_table(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let header_cells = ["Service", "Span", "Start", "Duration", "Span ID"]
        .iter()
        .map(|title| Cell::from(*title).style(Style::default().add_modifier(Modifier::BOLD)));
    let header_row = Row::new(header_cells).height(1);

    let trace_start = app
        .all_rows
        .iter()
        .filter_map(|row| row.span.timestamp)
        .min();
    let rows = app.all_rows.iter().map(|row| {
        let indent = "  ".repeat(row.depth.min(MAX_INDENT_DEPTH));
        Row::new(vec![
            Cell::from(row.span.service_name().unwrap_or("-").to_string()),
            Cell::from(format!("{indent}{}", row.span.display_name())),
            Cell::from(start_offset_text(&row.span, trace_start)),
            Cell::from(
                row.span
                    .duration
                    .map(format_duration_micros)
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::from(row.span.id.clone()),
        ])
    });

    let count = app.all_rows.len();
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(18),
            Constraint::Percentage(42),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Min(12),
        ],
    )
    .header(header_row)
    .block(
        Block::default()
            .title(format!(
                "Spans ({count} {})",
                pluralize(&count, "span", None)
            ))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .title_bottom("Up/Down move  Enter open in timeline  Esc back"),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(42, 47, 56))
            .add_modifier(Modifier::BOLD),
    );

    let mut table_state = TableState::default();
    if !app.all_rows.is_empty() {
        table_state.select(Some(app.table_selected.min(app.all_rows.len() - 1)));
    }
    frame.render_stateful_widget(table, area, &mut table_state);
}

fn draw_status(frame: &mut Frame<'_>, area: Rect, app: &TimelineApp) {
    let status_style = if app.status_is_error {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };

    let status = Paragraph::new(Line::from(UiSpan::styled(app.status.as_str(), status_style)))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
    frame.render_widget(status, area);
}

fn spinner_char(tick: usize) -> char {
    match tick % 4 {
        0 => '|',
        1 => '/',
        2 => '-',
        _ => '\\',
    }
}

fn root_error_message(err: &anyhow::Error) -> String {
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}
