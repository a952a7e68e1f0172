use crate::{
    model::{CanonicalSpan, RootSpanName},
    normalize,
};
use log::{debug, warn};
use std::collections::HashMap;

/// Index of a node inside its [`SpanTree`].
pub type NodeId = usize;

/// One span placed in the trace tree. Links are ids into the owning arena.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanNode {
    span: CanonicalSpan,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SpanNode {
    pub fn span(&self) -> &CanonicalSpan {
        &self.span
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn span_mut(&mut self) -> &mut CanonicalSpan {
        &mut self.span
    }
}

/// A forest of span nodes for one or more traces.
///
/// Spans whose parent was never reported are roots, as are spans whose parent
/// link would close a cycle. Children keep the order their spans were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanTree {
    nodes: Vec<SpanNode>,
    index: HashMap<(String, String), NodeId>,
    roots: Vec<NodeId>,
}

impl SpanTree {
    pub fn new() -> Self {
        SpanTree::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &SpanNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut SpanNode {
        &mut self.nodes[id]
    }

    pub fn find(&self, trace_id: &str, span_id: &str) -> Option<NodeId> {
        self.index.get(&(trace_id.to_string(), span_id.to_string())).copied()
    }

    /// Ids of the direct children of `id`, in order.
    pub fn child_ids(&self, id: NodeId) -> Vec<&str> {
        self.nodes[id]
            .children
            .iter()
            .map(|c| self.nodes[*c].span.id.as_str())
            .collect()
    }

    /// Adds a span as an unlinked root. A span already present under the same
    /// (trace id, span id) is merged into the existing node instead.
    pub fn insert(&mut self, span: CanonicalSpan) -> NodeId {
        let key = (span.trace_id.clone(), span.id.clone());
        if let Some(&existing) = self.index.get(&key) {
            let current = std::mem::take(&mut self.nodes[existing].span);
            self.nodes[existing].span = normalize::merge(vec![current, span]);
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(SpanNode {
            span,
            parent: None,
            children: Vec::new(),
        });
        self.index.insert(key, id);
        self.roots.push(id);
        id
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes[node].parent {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    fn detach(&mut self, child: NodeId) {
        match self.nodes[child].parent.take() {
            Some(old) => self.nodes[old].children.retain(|c| *c != child),
            None => self.roots.retain(|r| *r != child),
        }
    }

    /// Makes `child` a child of `parent`. Linking an existing pair again is a
    /// no-op; a link that would create a cycle is refused and returns `false`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.nodes[child].parent == Some(parent) {
            return true;
        }
        if self.is_ancestor(child, parent) {
            warn!(
                "refusing to link span {} under its descendant {}",
                self.nodes[child].span.id, self.nodes[parent].span.id
            );
            return false;
        }
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        true
    }

    /// Nodes in depth-first order with their depth, starting at 1 for roots.
    /// Parents precede descendants; siblings keep insertion order.
    pub fn depth_first(&self) -> Vec<(NodeId, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(NodeId, usize)> = self.roots.iter().rev().map(|r| (*r, 1)).collect();
        while let Some((id, depth)) = stack.pop() {
            out.push((id, depth));
            stack.extend(self.nodes[id].children.iter().rev().map(|c| (*c, depth + 1)));
        }
        out
    }

    /// Nodes level by level, roots first.
    pub fn breadth_first(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.roots.clone();
        let mut i = 0;
        while i < out.len() {
            let id = out[i];
            out.extend(self.nodes[id].children.iter().copied());
            i += 1;
        }
        out
    }

    /// Spans in depth-first order.
    pub fn spans(&self) -> impl Iterator<Item = &CanonicalSpan> + '_ {
        self.depth_first().into_iter().map(move |(id, _)| &self.nodes[id].span)
    }

    /// A trace is headless when none of its roots was reported without a parent.
    pub fn is_headless(&self) -> bool {
        !self.roots.is_empty() && self.true_root().is_none()
    }

    fn true_root(&self) -> Option<&CanonicalSpan> {
        self.roots
            .iter()
            .map(|r| &self.nodes[*r].span)
            .find(|s| s.parent_id.is_none())
    }

    /// Service and span name of the reported root, or `unknown` for both when
    /// the root span is missing.
    pub fn root_service_and_span_name(&self) -> RootSpanName {
        self.true_root().map(RootSpanName::of).unwrap_or_else(RootSpanName::unknown)
    }

    // Nodes not reachable from a root sit on a parent cycle. The first of them
    // in insertion order is cut loose, which breaks its cycle.
    fn isolate_cycles(&mut self) {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self.roots.clone();
        loop {
            while let Some(id) = stack.pop() {
                if !seen[id] {
                    seen[id] = true;
                    stack.extend(self.nodes[id].children.iter().copied());
                }
            }
            let orphan = match seen.iter().position(|s| !s) {
                Some(orphan) => orphan,
                None => return,
            };
            warn!(
                "span {}/{} is part of a parent cycle; treating it as a root",
                self.nodes[orphan].span.trace_id, self.nodes[orphan].span.id
            );
            self.detach(orphan);
            self.roots.push(orphan);
            stack.push(orphan);
        }
    }
}

/// Arranges canonical spans into a forest keyed by parent/child relationships.
///
/// Indexes every span in one pass, then wires each to its parent in a second.
/// Spans whose parent is absent become roots next to any reported root.
#[tracing::instrument(skip_all, fields(spans = spans.len()))]
pub fn build_forest(spans: Vec<CanonicalSpan>) -> SpanTree {
    let mut tree = SpanTree::new();
    for span in spans {
        tree.insert(span);
    }

    tree.roots.clear();
    for id in 0..tree.nodes.len() {
        let span = &tree.nodes[id].span;
        let parent = span
            .parent_id
            .as_ref()
            .and_then(|p| tree.index.get(&(span.trace_id.clone(), p.clone())).copied())
            .filter(|p| *p != id);
        match parent {
            Some(parent) => {
                tree.nodes[id].parent = Some(parent);
                tree.nodes[parent].children.push(id);
            }
            None => tree.roots.push(id),
        }
    }
    tree.isolate_cycles();

    if tree.is_headless() {
        debug!("trace has no root span; {} spans are parentless", tree.roots.len());
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Endpoint;

    fn span(id: &str, parent: Option<&str>) -> CanonicalSpan {
        CanonicalSpan {
            trace_id: "a".into(),
            id: id.into(),
            parent_id: parent.map(String::from),
            ..Default::default()
        }
    }

    fn ids(tree: &SpanTree, nodes: &[NodeId]) -> Vec<String> {
        nodes.iter().map(|n| tree.node(*n).span().id.clone()).collect()
    }

    #[test]
    fn builds_by_parent_not_argument_order() {
        let tree = build_forest(vec![
            span("d", Some("c")),
            span("c", Some("b")),
            span("b", Some("a")),
            span("a", None),
        ]);

        assert_eq!(ids(&tree, tree.roots()), vec!["a"]);
        let order: Vec<(String, usize)> = tree
            .depth_first()
            .into_iter()
            .map(|(n, d)| (tree.node(n).span().id.clone(), d))
            .collect();
        assert_eq!(
            order,
            vec![("a".into(), 1), ("b".into(), 2), ("c".into(), 3), ("d".into(), 4)]
        );
    }

    #[test]
    fn dedupes_while_building() {
        let tree = build_forest(vec![span("a", None), span("a", None), span("a", None)]);
        assert_eq!(tree.len(), 1);
        assert!(tree.node(tree.roots()[0]).children().is_empty());
    }

    #[test]
    fn keeps_multiple_roots_as_siblings() {
        let tree = build_forest(vec![
            span("b", None),
            span("c", Some("b")),
            span("d", Some("b")),
            span("e", None),
            span("f", None),
        ]);
        assert_eq!(ids(&tree, tree.roots()), vec!["b", "e", "f"]);
        assert_eq!(tree.child_ids(tree.roots()[0]), vec!["c", "d"]);
        assert!(!tree.is_headless());
    }

    #[test]
    fn headless_trace_roots_at_orphans() {
        let mut orphan = span("b", Some("missing"));
        orphan.local_endpoint = Some(Endpoint::named("backend"));
        orphan.name = Some("get".into());
        let tree = build_forest(vec![orphan]);

        assert_eq!(ids(&tree, tree.roots()), vec!["b"]);
        assert!(tree.is_headless());
        assert_eq!(tree.root_service_and_span_name(), RootSpanName::unknown());
    }

    #[test]
    fn root_names_come_from_reported_root() {
        let mut root = span("a", None);
        root.local_endpoint = Some(Endpoint::named("frontend"));
        let tree = build_forest(vec![root]);
        let name = tree.root_service_and_span_name();
        assert_eq!(name.service_name, "frontend");
        assert_eq!(name.span_name, "unknown");
    }

    #[test]
    fn breaks_parent_cycles() {
        let tree = build_forest(vec![span("a", Some("b")), span("b", Some("a")), span("c", Some("a"))]);

        assert_eq!(tree.len(), 3);
        assert_eq!(ids(&tree, tree.roots()), vec!["a"]);
        assert_eq!(tree.depth_first().len(), 3);
    }

    #[test]
    fn add_child_is_idempotent_and_refuses_cycles() {
        let mut tree = SpanTree::new();
        let a = tree.insert(span("a", None));
        let b = tree.insert(span("b", Some("a")));

        assert!(tree.add_child(a, b));
        assert!(tree.add_child(a, b));
        assert_eq!(tree.node(a).children(), &[b]);
        assert_eq!(tree.roots(), &[a]);

        assert!(!tree.add_child(b, a));
        assert!(!tree.add_child(a, a));
        assert_eq!(tree.node(b).parent(), Some(a));
    }

    #[test]
    fn insert_merges_same_id() {
        let mut tree = SpanTree::new();
        let mut first = span("a", None);
        first.tags.insert("k1".into(), "v1".into());
        let mut second = span("a", None);
        second.tags.insert("k2".into(), "v2".into());

        let n1 = tree.insert(first);
        let n2 = tree.insert(second);
        assert_eq!(n1, n2);
        assert_eq!(tree.node(n1).span().tags.len(), 2);
    }

    #[test]
    fn traverses_breadth_first() {
        let tree = build_forest(vec![
            span("a", None),
            span("b", Some("a")),
            span("c", Some("a")),
            span("d", Some("b")),
        ]);
        assert_eq!(ids(&tree, &tree.breadth_first()), vec!["a", "b", "c", "d"]);
    }
}
