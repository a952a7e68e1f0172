//! Turns flat lists of Zipkin spans into call trees, clock-skew corrected
//! timelines and ranked trace summaries.

pub mod api;
pub mod client;
pub mod error;
pub mod format;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod skew;
pub mod summary;
pub mod timeline;
pub mod tree;

pub use crate::{
    api::RawSpan,
    client::{Config, TraceQuery, ZipkinClient},
    error::{Error, Result},
    format::mk_duration_str,
    logging::LoggingConfig,
    model::{CanonicalSpan, Endpoint, ErrorType, RootSpanName},
    normalize::normalize,
    skew::correct_skew,
    summary::{rank_traces, summarize, summarize_with, SortOrder, SummaryOptions, TraceSummary},
    timeline::{detailed_trace, layout, DetailedSpan, TraceDetail},
    tree::{build_forest, SpanNode, SpanTree},
};

/// Normalizes raw spans and returns their skew-corrected forest.
pub fn trace_tree(raw: &[RawSpan]) -> SpanTree {
    correct_skew(&build_forest(normalize(raw)))
}

/// Summary of each trace, ranked for a result list. Traces with nothing to
/// summarize are left out.
pub fn trace_summaries(traces: &[Vec<RawSpan>], options: &SummaryOptions, order: SortOrder) -> Vec<TraceSummary> {
    let summaries = traces
        .iter()
        .filter_map(|raw| {
            let spans: Vec<CanonicalSpan> = trace_tree(raw).spans().cloned().collect();
            summarize_with(&spans, options)
        })
        .collect();
    rank_traces(summaries, order)
}

/// Timeline view of one trace over `window`, or over the whole trace.
pub fn trace_detail(raw: &[RawSpan], window: Option<(i64, i64)>) -> Option<TraceDetail> {
    detailed_trace(&trace_tree(raw), window)
}
