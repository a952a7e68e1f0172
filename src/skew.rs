use crate::{
    model::{CanonicalSpan, Endpoint},
    tree::{NodeId, SpanTree},
};
use log::debug;

/// Clock offset of a server relative to the client that called it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSkew {
    /// Positive when the server clock runs ahead of the client's.
    pub offset: i64,
    /// Whether the client pair came from the span itself rather than its parent.
    pub same_span: bool,
}

/// Offset between a server's `sr` and the midpoint of the client's round trip.
///
/// The client pair comes from the span itself when it recorded both halves of
/// the RPC, otherwise from its parent. Spans missing either pair, or whose
/// client and server share an IP, yield `None`.
pub fn clock_skew(span: &CanonicalSpan, parent: Option<&CanonicalSpan>) -> Option<ClockSkew> {
    let (sr, _) = span.server_pair()?;
    let (client, same_span) = match span.client_pair() {
        Some(_) => (span, true),
        None => (parent?, false),
    };
    let (cs, cr) = client.client_pair()?;

    if let (Some(c), Some(s)) = (client.client_endpoint(), span.server_endpoint()) {
        if ips_match(c, s) {
            // skew on one host is an instrumentation bug, not a clock problem
            return None;
        }
    }

    let midpoint = cs.checked_add(cr.checked_sub(cs)? / 2)?;
    let offset = sr.checked_sub(midpoint)?;
    if offset == 0 {
        None
    } else {
        Some(ClockSkew { offset, same_span })
    }
}

pub fn ips_match(a: &Endpoint, b: &Endpoint) -> bool {
    a.ips_match(b)
}

/// Returns a copy of the forest with each server subtree moved onto its
/// caller's clock.
///
/// Edges are visited top-down. An edge is measured after its ancestors'
/// corrections were applied, so corrections down a path accumulate. Durations
/// never change.
#[tracing::instrument(skip_all, fields(spans = tree.len()))]
pub fn correct_skew(tree: &SpanTree) -> SpanTree {
    let mut corrected = tree.clone();
    let mut stack: Vec<(NodeId, i64)> = tree.roots().iter().rev().map(|r| (*r, 0)).collect();

    while let Some((id, inherited)) = stack.pop() {
        corrected.node_mut(id).span_mut().shift(inherited);

        let skew = {
            let node = corrected.node(id);
            let parent = node.parent().map(|p| corrected.node(p).span());
            clock_skew(node.span(), parent)
        };

        let applied = match skew {
            Some(skew) => {
                let span = corrected.node_mut(id).span_mut();
                debug!(
                    "correcting clock skew of {}us on span {}/{}",
                    skew.offset, span.trace_id, span.id
                );
                if skew.same_span {
                    span.shift_server_side(-skew.offset);
                } else {
                    span.shift(-skew.offset);
                }
                inherited.saturating_sub(skew.offset)
            }
            None => inherited,
        };

        stack.extend(corrected.node(id).children().iter().rev().map(|c| (*c, applied)));
    }
    corrected
}
