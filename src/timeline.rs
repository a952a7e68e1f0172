use crate::{
    format::mk_duration_str,
    model::{AddressKind, CanonicalSpan, CoreAnnotation, ErrorType, RootSpanName},
    summary::trace_bounds,
    tree::{NodeId, SpanTree},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Human readable label for an annotation value or address key. Unknown
/// values are returned as is.
pub fn display_name(value: &str) -> &str {
    if let Some(core) = CoreAnnotation::from_code(value) {
        core.display_name()
    } else if let Some(address) = AddressKind::from_key(value) {
        address.display_name()
    } else {
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarKind {
    Span,
    Client,
    Server,
}

/// Horizontal extent of one bar, in percent of the viewing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineBar {
    pub kind: BarKind,
    pub left: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationMark {
    pub value: String,
    pub timestamp: i64,
    /// Offset inside the span, in percent of its duration.
    pub left: f64,
    pub relative_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLabel {
    pub key: String,
    pub value: String,
}

/// One timeline row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedSpan {
    #[serde(flatten)]
    pub span: CanonicalSpan,
    pub depth: usize,
    pub left: f64,
    pub width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub service_names: Vec<String>,
    pub error_type: ErrorType,
    pub duration_str: String,
    pub child_ids: Vec<String>,
    pub bars: Vec<TimelineBar>,
    pub annotation_marks: Vec<AnnotationMark>,
    pub address_labels: Vec<AddressLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: i64,
    end: i64,
}

impl Window {
    // (left, width) of [start, end] clipped to the window.
    fn place(self, start: i64, end: i64) -> (f64, f64) {
        let len = self.end.saturating_sub(self.start);
        if len <= 0 || end < self.start {
            return (0.0, 0.0);
        }
        if start > self.end {
            return (100.0, 0.0);
        }
        let pct = |t: i64| t.saturating_sub(self.start) as f64 * 100.0 / len as f64;
        let left = pct(start.max(self.start));
        let right = pct(end.min(self.end));
        (left, (right - left).max(0.0).min(100.0 - left))
    }
}

fn annotation_marks(span: &CanonicalSpan, window_start: i64) -> Vec<AnnotationMark> {
    let start = span.timestamp.unwrap_or(window_start);
    let duration = span.duration.unwrap_or(0);
    let mut marks: Vec<AnnotationMark> = span
        .core
        .values()
        .chain(span.annotations.iter())
        .map(|a| AnnotationMark {
            value: display_name(&a.value).to_string(),
            timestamp: a.timestamp,
            left: if duration > 0 {
                a.timestamp.saturating_sub(start) as f64 * 100.0 / duration as f64
            } else {
                0.0
            },
            relative_time: mk_duration_str(a.timestamp.saturating_sub(window_start)),
            endpoint: a.endpoint.as_ref().map(|e| e.display()),
        })
        .collect();
    marks.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.value.cmp(&b.value)));
    marks
}

fn detail(tree: &SpanTree, id: NodeId, depth: usize, window: Window) -> DetailedSpan {
    let span = tree.node(id).span();
    let (left, width) = match span.timestamp {
        Some(ts) => window.place(ts, span.end().unwrap_or(ts)),
        None => (0.0, 0.0),
    };

    let bars = match (span.client_pair(), span.server_pair()) {
        (Some((cs, cr)), Some((sr, ss))) => {
            let (cl, cw) = window.place(cs, cr);
            let (sl, sw) = window.place(sr, ss);
            vec![
                TimelineBar {
                    kind: BarKind::Client,
                    left: cl,
                    width: cw,
                },
                TimelineBar {
                    kind: BarKind::Server,
                    left: sl,
                    width: sw,
                },
            ]
        }
        _ => vec![TimelineBar {
            kind: BarKind::Span,
            left,
            width,
        }],
    };

    DetailedSpan {
        depth,
        left,
        width,
        service_name: span.service_name().map(String::from),
        service_names: span.service_names(),
        error_type: span.error_type(),
        duration_str: mk_duration_str(span.duration.unwrap_or(0)),
        child_ids: tree.child_ids(id).into_iter().map(String::from).collect(),
        bars,
        annotation_marks: annotation_marks(span, window.start),
        address_labels: span
            .addresses
            .iter()
            .map(|a| AddressLabel {
                key: a.kind.display_name().to_string(),
                value: a.endpoint.display(),
            })
            .collect(),
        span: span.clone(),
    }
}

/// Lays the forest out as rows for a timeline, parents before descendants.
///
/// `left`/`width` are percentages of `[window_start, window_end]`. Spans
/// entirely outside the window get zero width; partial overlaps are clipped.
#[tracing::instrument(skip(tree), fields(spans = tree.len()))]
pub fn layout(tree: &SpanTree, window_start: i64, window_end: i64) -> Vec<DetailedSpan> {
    let window = Window {
        start: window_start,
        end: window_end,
    };
    tree.depth_first()
        .into_iter()
        .map(|(id, depth)| detail(tree, id, depth, window))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpanCount {
    pub service_name: String,
    pub span_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeMarker {
    pub index: usize,
    pub time: String,
}

/// Everything a trace detail page renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDetail {
    pub trace_id: String,
    pub timestamp: i64,
    pub duration: i64,
    pub duration_str: String,
    pub depth: usize,
    pub root_span: RootSpanName,
    pub service_name_and_span_counts: Vec<ServiceSpanCount>,
    pub time_markers: Vec<TimeMarker>,
    pub spans: Vec<DetailedSpan>,
}

const TIME_MARKERS: usize = 5;

/// Builds the detail view of one trace. The window defaults to the trace's
/// own extent. Returns `None` for an empty tree.
pub fn detailed_trace(tree: &SpanTree, window: Option<(i64, i64)>) -> Option<TraceDetail> {
    let first = tree.roots().first().map(|r| tree.node(*r).span())?;
    let (timestamp, duration) = trace_bounds(tree.spans()).unwrap_or((0, 0));
    let (window_start, window_end) = window.unwrap_or((timestamp, timestamp.saturating_add(duration)));

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for span in tree.spans() {
        for name in span.service_names() {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    let spans = layout(tree, window_start, window_end);
    let span_range = window_end.saturating_sub(window_start);
    Some(TraceDetail {
        trace_id: first.trace_id.clone(),
        timestamp,
        duration,
        duration_str: mk_duration_str(duration),
        depth: spans.iter().map(|s| s.depth).max().unwrap_or(0),
        root_span: tree.root_service_and_span_name(),
        service_name_and_span_counts: counts
            .into_iter()
            .map(|(service_name, span_count)| ServiceSpanCount {
                service_name,
                span_count,
            })
            .collect(),
        time_markers: (0..=TIME_MARKERS)
            .map(|index| TimeMarker {
                index,
                time: mk_duration_str(span_range.saturating_mul(index as i64) / TIME_MARKERS as i64),
            })
            .collect(),
        spans,
    })
}
