use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::span::Span;

/// One span attached to its children. Depth is not stored here; it is
/// assigned at projection time so rerooting restarts it at zero.
#[derive(Debug, Clone)]
pub struct SpanNode {
    pub span: Span,
    pub children: Vec<SpanNode>,
}

/// Span ids whose children are currently hidden.
#[derive(Debug, Clone, Default)]
pub struct CollapsedSet(HashSet<String>);

impl CollapsedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self, span_id: &str) -> bool {
        self.0.contains(span_id)
    }

    /// Flips the span and reports whether it is closed afterwards.
    pub fn toggle(&mut self, span_id: &str) -> bool {
        if self.0.remove(span_id) {
            false
        } else {
            self.0.insert(span_id.to_string());
            true
        }
    }

    pub fn close(&mut self, span_id: &str) {
        self.0.insert(span_id.to_string());
    }

    pub fn open(&mut self, span_id: &str) {
        self.0.remove(span_id);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A projected row: the span plus where it sits in the visible outline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRow {
    #[serde(flatten)]
    pub span: Span,
    pub depth: usize,
    pub has_children: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimestampBounds {
    pub min: u64,
    pub max: u64,
}

impl TimestampBounds {
    pub fn width(&self) -> u64 {
        self.max.saturating_sub(self.min)
    }
}

fn span_order(a: &Span, b: &Span) -> Ordering {
    match (a.timestamp, b.timestamp) {
        (Some(left), Some(right)) => left.cmp(&right).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// Builds the span forest for a trace. Spans with a missing, empty, or
/// unresolvable parent id become roots, as does a span that claims itself
/// as parent. Reference cycles are broken at the first revisited span, and
/// any span left unreachable afterwards is promoted to a root, so every
/// input span lands in the output exactly once.
pub fn build_span_tree(spans: &[Span]) -> Vec<SpanNode> {
    let mut index_by_id: HashMap<&str, usize> = HashMap::new();
    for (index, span) in spans.iter().enumerate() {
        index_by_id.entry(span.id.as_str()).or_insert(index);
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (index, span) in spans.iter().enumerate() {
        let parent = span
            .parent_id
            .as_deref()
            .filter(|parent_id| !parent_id.is_empty() && *parent_id != span.id)
            .and_then(|parent_id| index_by_id.get(parent_id).copied());
        match parent {
            Some(parent_index) => children.entry(parent_index).or_default().push(index),
            None => roots.push(index),
        }
    }

    roots.sort_by(|&a, &b| span_order(&spans[a], &spans[b]));
    for child_indices in children.values_mut() {
        child_indices.sort_by(|&a, &b| span_order(&spans[a], &spans[b]));
    }

    let mut visited: HashSet<usize> = HashSet::new();
    let mut forest: Vec<SpanNode> = Vec::new();
    for &root in &roots {
        if let Some(node) = attach(root, spans, &children, &mut visited) {
            forest.push(node);
        }
    }

    // Cycle members are reachable from no root; surface them in span order.
    let mut leftovers: Vec<usize> = (0..spans.len())
        .filter(|index| !visited.contains(index))
        .collect();
    leftovers.sort_by(|&a, &b| span_order(&spans[a], &spans[b]));
    for leftover in leftovers {
        if let Some(node) = attach(leftover, spans, &children, &mut visited) {
            forest.push(node);
        }
    }

    forest
}

fn attach(
    index: usize,
    spans: &[Span],
    children: &HashMap<usize, Vec<usize>>,
    visited: &mut HashSet<usize>,
) -> Option<SpanNode> {
    if !visited.insert(index) {
        return None;
    }
    let mut node = SpanNode {
        span: spans[index].clone(),
        children: Vec::new(),
    };
    if let Some(child_indices) = children.get(&index) {
        for &child in child_indices {
            if let Some(child_node) = attach(child, spans, children, visited) {
                node.children.push(child_node);
            }
        }
    }
    Some(node)
}

/// Projects the forest into the rows a viewer should render: pre-order,
/// skipping the subtrees of closed spans. Rerooting to a known span id
/// emits only that subtree with depth restarting at zero; an unknown id
/// falls back to the whole forest. Bounds cover the emitted rows only.
pub fn visible_rows(
    roots: &[SpanNode],
    collapsed: &CollapsedSet,
    reroot_span_id: Option<&str>,
) -> (Vec<SpanRow>, Option<TimestampBounds>) {
    let mut rows = Vec::new();
    match reroot_span_id.and_then(|span_id| find_node(roots, span_id)) {
        Some(node) => collect_rows(node, 0, collapsed, &mut rows),
        None => {
            for root in roots {
                collect_rows(root, 0, collapsed, &mut rows);
            }
        }
    }
    let bounds = row_bounds(&rows);
    (rows, bounds)
}

fn collect_rows(node: &SpanNode, depth: usize, collapsed: &CollapsedSet, rows: &mut Vec<SpanRow>) {
    rows.push(SpanRow {
        span: node.span.clone(),
        depth,
        has_children: !node.children.is_empty(),
    });
    if collapsed.is_closed(&node.span.id) {
        return;
    }
    for child in &node.children {
        collect_rows(child, depth + 1, collapsed, rows);
    }
}

fn row_bounds(rows: &[SpanRow]) -> Option<TimestampBounds> {
    let min = rows.iter().filter_map(|row| row.span.timestamp).min()?;
    let max = rows
        .iter()
        .filter_map(|row| row.span.end_timestamp())
        .max()
        .unwrap_or(min);
    Some(TimestampBounds {
        min,
        max: max.max(min),
    })
}

pub fn find_node<'a>(roots: &'a [SpanNode], span_id: &str) -> Option<&'a SpanNode> {
    for root in roots {
        if root.span.id == span_id {
            return Some(root);
        }
        if let Some(found) = find_node(&root.children, span_id) {
            return Some(found);
        }
    }
    None
}

/// Ids of every ancestor of `span_id`, outermost first. None if absent.
pub fn ancestor_ids(roots: &[SpanNode], span_id: &str) -> Option<Vec<String>> {
    fn walk(node: &SpanNode, span_id: &str, path: &mut Vec<String>) -> bool {
        if node.span.id == span_id {
            return true;
        }
        path.push(node.span.id.clone());
        for child in &node.children {
            if walk(child, span_id, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    let mut path = Vec::new();
    for root in roots {
        if walk(root, span_id, &mut path) {
            return Some(path);
        }
    }
    None
}

/// Ids of every span that has children, for collapse-all.
pub fn parent_span_ids(roots: &[SpanNode]) -> Vec<String> {
    fn walk(node: &SpanNode, out: &mut Vec<String>) {
        if !node.children.is_empty() {
            out.push(node.span.id.clone());
        }
        for child in &node.children {
            walk(child, out);
        }
    }

    let mut out = Vec::new();
    for root in roots {
        walk(root, &mut out);
    }
    out
}

pub fn max_depth(roots: &[SpanNode]) -> usize {
    fn depth_of(node: &SpanNode) -> usize {
        1 + node.children.iter().map(depth_of).max().unwrap_or(0)
    }

    roots.iter().map(depth_of).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: &str, parent: Option<&str>, timestamp: Option<u64>, duration: Option<u64>) -> Span {
        Span {
            trace_id: "trace".into(),
            id: id.into(),
            parent_id: parent.map(str::to_string),
            timestamp,
            duration,
            ..Span::default()
        }
    }

    fn visible_ids(rows: &[SpanRow]) -> Vec<&str> {
        rows.iter().map(|row| row.span.id.as_str()).collect()
    }

    #[test]
    fn every_span_appears_exactly_once() {
        let spans = vec![
            span("root", None, Some(10), Some(100)),
            span("child", Some("root"), Some(20), Some(30)),
            span("orphan", Some("nowhere"), Some(15), Some(5)),
            span("x", Some("y"), Some(40), None),
            span("y", Some("x"), Some(30), None),
        ];
        let roots = build_span_tree(&spans);
        let (rows, _) = visible_rows(&roots, &CollapsedSet::new(), None);

        let mut ids = visible_ids(&rows);
        ids.sort_unstable();
        assert_eq!(ids, vec!["child", "orphan", "root", "x", "y"]);
    }

    #[test]
    fn missing_parent_promotes_span_to_root() {
        let spans = vec![
            span("a", None, Some(10), None),
            span("b", Some("gone"), Some(5), None),
        ];
        let roots = build_span_tree(&spans);
        let root_ids: Vec<&str> = roots.iter().map(|node| node.span.id.as_str()).collect();
        assert_eq!(root_ids, vec!["b", "a"]);
    }

    #[test]
    fn self_parented_span_becomes_root() {
        let spans = vec![span("loop", Some("loop"), Some(1), None)];
        let roots = build_span_tree(&spans);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].span.id, "loop");
        assert!(roots[0].children.is_empty());
    }

    #[test]
    fn empty_parent_id_counts_as_absent() {
        let spans = vec![span("a", Some(""), Some(1), None)];
        let roots = build_span_tree(&spans);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].span.id, "a");
    }

    #[test]
    fn cycle_terminates_and_keeps_both_members() {
        let spans = vec![
            span("a", Some("b"), Some(10), None),
            span("b", Some("a"), Some(20), None),
        ];
        let roots = build_span_tree(&spans);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].span.id, "a");
        assert_eq!(roots[0].children.len(), 1);
        assert_eq!(roots[0].children[0].span.id, "b");
        assert!(roots[0].children[0].children.is_empty());
    }

    #[test]
    fn children_sort_by_timestamp_with_unstamped_last() {
        let spans = vec![
            span("root", None, Some(1), Some(100)),
            span("late", Some("root"), Some(30), None),
            span("unstamped-b", Some("root"), None, None),
            span("early", Some("root"), Some(10), None),
            span("unstamped-a", Some("root"), None, None),
        ];
        let roots = build_span_tree(&spans);
        let child_ids: Vec<&str> = roots[0]
            .children
            .iter()
            .map(|node| node.span.id.as_str())
            .collect();
        assert_eq!(child_ids, vec!["early", "late", "unstamped-a", "unstamped-b"]);
    }

    #[test]
    fn tied_timestamps_break_by_span_id() {
        let spans = vec![
            span("root", None, Some(1), None),
            span("zz", Some("root"), Some(10), None),
            span("aa", Some("root"), Some(10), None),
        ];
        let roots = build_span_tree(&spans);
        let child_ids: Vec<&str> = roots[0]
            .children
            .iter()
            .map(|node| node.span.id.as_str())
            .collect();
        assert_eq!(child_ids, vec!["aa", "zz"]);
    }

    #[test]
    fn duplicate_span_ids_all_survive() {
        let spans = vec![
            span("root", None, Some(1), None),
            span("dup", Some("root"), Some(10), None),
            span("dup", Some("root"), Some(20), None),
        ];
        let roots = build_span_tree(&spans);
        let (rows, _) = visible_rows(&roots, &CollapsedSet::new(), None);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn projection_is_preorder() {
        let spans = vec![
            span("root", None, Some(1), Some(100)),
            span("a", Some("root"), Some(10), Some(20)),
            span("a1", Some("a"), Some(12), Some(5)),
            span("b", Some("root"), Some(40), Some(20)),
        ];
        let roots = build_span_tree(&spans);
        let (rows, _) = visible_rows(&roots, &CollapsedSet::new(), None);
        assert_eq!(visible_ids(&rows), vec!["root", "a", "a1", "b"]);
        let depths: Vec<usize> = rows.iter().map(|row| row.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 1]);
    }

    #[test]
    fn collapsed_span_stays_visible_but_hides_descendants() {
        let spans = vec![
            span("root", None, Some(1), Some(100)),
            span("a", Some("root"), Some(10), Some(20)),
            span("a1", Some("a"), Some(12), Some(5)),
            span("b", Some("root"), Some(40), Some(20)),
        ];
        let roots = build_span_tree(&spans);
        let mut collapsed = CollapsedSet::new();
        collapsed.toggle("a");
        let (rows, _) = visible_rows(&roots, &collapsed, None);
        assert_eq!(visible_ids(&rows), vec!["root", "a", "b"]);
        assert!(rows[1].has_children);

        collapsed.toggle("a");
        let (rows, _) = visible_rows(&roots, &collapsed, None);
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn reroot_restarts_depth_at_zero() {
        let spans = vec![
            span("root", None, Some(1), Some(100)),
            span("a", Some("root"), Some(10), Some(20)),
            span("a1", Some("a"), Some(12), Some(5)),
            span("b", Some("root"), Some(40), Some(20)),
        ];
        let roots = build_span_tree(&spans);
        let (rows, _) = visible_rows(&roots, &CollapsedSet::new(), Some("a"));
        assert_eq!(visible_ids(&rows), vec!["a", "a1"]);
        assert_eq!(rows[0].depth, 0);
        assert_eq!(rows[1].depth, 1);
    }

    #[test]
    fn unknown_reroot_id_falls_back_to_full_forest() {
        let spans = vec![
            span("root", None, Some(1), Some(100)),
            span("a", Some("root"), Some(10), Some(20)),
        ];
        let roots = build_span_tree(&spans);
        let (rows, _) = visible_rows(&roots, &CollapsedSet::new(), Some("missing"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn bounds_cover_only_visible_rows() {
        let spans = vec![
            span("root", None, Some(100), Some(50)),
            span("a", Some("root"), Some(120), Some(200)),
        ];
        let roots = build_span_tree(&spans);

        let (_, bounds) = visible_rows(&roots, &CollapsedSet::new(), None);
        assert_eq!(bounds, Some(TimestampBounds { min: 100, max: 320 }));

        let mut collapsed = CollapsedSet::new();
        collapsed.close("root");
        let (_, bounds) = visible_rows(&roots, &collapsed, None);
        assert_eq!(bounds, Some(TimestampBounds { min: 100, max: 150 }));
    }

    #[test]
    fn bounds_ignore_unstamped_rows_and_handle_empty_input() {
        let spans = vec![
            span("root", None, None, None),
            span("a", Some("root"), Some(100), Some(50)),
        ];
        let roots = build_span_tree(&spans);
        let (rows, bounds) = visible_rows(&roots, &CollapsedSet::new(), None);
        assert_eq!(rows.len(), 2);
        assert_eq!(bounds, Some(TimestampBounds { min: 100, max: 150 }));

        let (rows, bounds) = visible_rows(&build_span_tree(&[]), &CollapsedSet::new(), None);
        assert!(rows.is_empty());
        assert_eq!(bounds, None);

        let unstamped = build_span_tree(&[span("only", None, None, None)]);
        let (rows, bounds) = visible_rows(&unstamped, &CollapsedSet::new(), None);
        assert_eq!(rows.len(), 1);
        assert_eq!(bounds, None);
    }

    #[test]
    fn ancestor_chain_is_outermost_first() {
        let spans = vec![
            span("root", None, Some(1), None),
            span("a", Some("root"), Some(2), None),
            span("a1", Some("a"), Some(3), None),
        ];
        let roots = build_span_tree(&spans);
        assert_eq!(
            ancestor_ids(&roots, "a1"),
            Some(vec!["root".to_string(), "a".to_string()])
        );
        assert_eq!(ancestor_ids(&roots, "root"), Some(Vec::new()));
        assert_eq!(ancestor_ids(&roots, "missing"), None);
    }

    #[test]
    fn parent_span_ids_lists_every_collapsible_span() {
        let spans = vec![
            span("root", None, Some(1), None),
            span("a", Some("root"), Some(2), None),
            span("a1", Some("a"), Some(3), None),
            span("b", Some("root"), Some(4), None),
        ];
        let roots = build_span_tree(&spans);
        assert_eq!(parent_span_ids(&roots), vec!["root", "a"]);
        assert_eq!(max_depth(&roots), 3);
    }
}
