use crate::{
    format::{format_start_ts, mk_duration_str},
    model::{CanonicalSpan, ErrorType, RootSpanName},
    normalize::span_comparator,
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap};

/// Options for list-view summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Service whose share of each trace is reported as `servicePercentage`.
    pub service_name: Option<String>,
    /// Format `startTs` in UTC rather than the local time zone.
    pub utc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub service_name: String,
    pub span_count: usize,
    pub max_span_duration_str: String,
}

/// Aggregate view of one trace, for result lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub trace_id: String,
    pub timestamp: i64,
    pub start_ts: String,
    pub duration: i64,
    pub duration_str: String,
    pub service_summaries: Vec<ServiceSummary>,
    pub span_count: usize,
    /// Percentage of the longest trace in the ranked set. Zero until ranked.
    pub width: u32,
    pub error_type: ErrorType,
    pub info_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_percentage: Option<u32>,
    pub root: RootSpanName,
}

/// Start and length of the interval covering every known span timestamp.
pub fn trace_bounds<'a, I>(spans: I) -> Option<(i64, i64)>
where
    I: IntoIterator<Item = &'a CanonicalSpan>,
{
    let mut bounds: Option<(i64, i64)> = None;
    for span in spans {
        let ts = match span.timestamp {
            Some(ts) => ts,
            None => continue,
        };
        let end = span.end().unwrap_or(ts);
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(ts), hi.max(end).max(ts)),
            None => (ts, end.max(ts)),
        });
    }
    bounds.map(|(lo, hi)| (lo, hi.saturating_sub(lo)))
}

/// Time covered by the union of `(timestamp, duration)` intervals.
pub fn total_duration(intervals: &[(i64, i64)]) -> i64 {
    let mut sorted: Vec<(i64, i64)> = intervals.iter().copied().filter(|(_, d)| *d > 0).collect();
    sorted.sort();

    let mut total: i64 = 0;
    let mut current_end: Option<i64> = None;
    for (ts, duration) in sorted {
        let end = ts.saturating_add(duration);
        match current_end {
            Some(e) if end <= e => {}
            Some(e) if ts <= e => {
                total = total.saturating_add(end - e);
                current_end = Some(end);
            }
            _ => {
                total = total.saturating_add(duration);
                current_end = Some(end);
            }
        }
    }
    total
}

/// Summary of one trace, or `None` when there is nothing to summarize.
pub fn summarize(spans: &[CanonicalSpan]) -> Option<TraceSummary> {
    summarize_with(spans, &SummaryOptions::default())
}

#[tracing::instrument(skip_all, fields(spans = spans.len()))]
pub fn summarize_with(spans: &[CanonicalSpan], options: &SummaryOptions) -> Option<TraceSummary> {
    let mut sorted: Vec<&CanonicalSpan> = spans.iter().collect();
    sorted.sort_by(|a, b| span_comparator(a, b));
    let first = *sorted.first()?;
    first.timestamp?;
    let (timestamp, duration) = trace_bounds(spans.iter())?;

    // (span count, longest duration, timed intervals) per service
    let mut grouped: BTreeMap<String, (usize, i64, Vec<(i64, i64)>)> = BTreeMap::new();
    for span in spans {
        for name in span.service_names() {
            let entry = grouped.entry(name).or_insert_with(|| (0, 0, Vec::new()));
            entry.0 += 1;
            entry.1 = entry.1.max(span.duration.unwrap_or(0));
            if let (Some(ts), Some(d)) = (span.timestamp, span.duration) {
                entry.2.push((ts, d));
            }
        }
    }

    let mut services: Vec<(String, usize, i64)> = grouped
        .iter()
        .map(|(name, (count, max, _))| (name.clone(), *count, *max))
        .collect();
    services.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let service_percentage = match &options.service_name {
        Some(service) if duration > 0 => grouped
            .get(service)
            .map(|(_, _, intervals)| (total_duration(intervals).saturating_mul(100) / duration).min(100) as u32),
        _ => None,
    };

    let error_type = spans.iter().map(CanonicalSpan::error_type).max().unwrap_or_default();
    let root = if first.parent_id.is_none() {
        RootSpanName::of(first)
    } else {
        RootSpanName::unknown()
    };

    Some(TraceSummary {
        trace_id: first.trace_id.clone(),
        timestamp,
        start_ts: format_start_ts(timestamp, options.utc),
        duration,
        duration_str: mk_duration_str(duration),
        service_summaries: services
            .into_iter()
            .map(|(service_name, span_count, max)| ServiceSummary {
                service_name,
                span_count,
                max_span_duration_str: mk_duration_str(max),
            })
            .collect(),
        span_count: spans.len(),
        width: 0,
        error_type,
        info_class: error_type.info_class(),
        service_percentage,
        root,
    })
}

/// Orderings offered by result lists. Ties always fall back to ascending trace id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    LongestFirst,
    ShortestFirst,
    NewestFirst,
    OldestFirst,
    ServicePercentageDesc,
    ServicePercentageAsc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::LongestFirst
    }
}

impl SortOrder {
    pub fn compare(self, a: &TraceSummary, b: &TraceSummary) -> Ordering {
        let primary = match self {
            SortOrder::LongestFirst => b.duration.cmp(&a.duration),
            SortOrder::ShortestFirst => a.duration.cmp(&b.duration),
            SortOrder::NewestFirst => b.timestamp.cmp(&a.timestamp),
            SortOrder::OldestFirst => a.timestamp.cmp(&b.timestamp),
            SortOrder::ServicePercentageDesc => b.service_percentage.cmp(&a.service_percentage),
            SortOrder::ServicePercentageAsc => a.service_percentage.cmp(&b.service_percentage),
        };
        primary.then_with(|| a.trace_id.cmp(&b.trace_id))
    }
}

fn relative_width(duration: i64, max: i64) -> u32 {
    if max <= 0 {
        0
    } else {
        (duration as f64 / max as f64 * 100.0).round() as u32
    }
}

/// Sets each summary's width relative to the longest trace and sorts the set.
pub fn rank_traces(summaries: Vec<TraceSummary>, order: SortOrder) -> Vec<TraceSummary> {
    let max = summaries.iter().map(|s| s.duration).max().unwrap_or(0);
    let mut ranked: Vec<TraceSummary> = summaries
        .into_iter()
        .map(|s| TraceSummary {
            width: relative_width(s.duration, max),
            ..s
        })
        .collect();
    ranked.sort_by(|a, b| order.compare(a, b));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Annotation, Endpoint};

    fn span(trace_id: &str, id: &str, parent: Option<&str>, ts: Option<i64>, duration: Option<i64>, service: &str) -> CanonicalSpan {
        let ep = Endpoint::named(service);
        CanonicalSpan {
            trace_id: trace_id.into(),
            id: id.into(),
            parent_id: parent.map(String::from),
            timestamp: ts,
            duration,
            local_endpoint: Some(ep.clone()),
            endpoints: vec![ep],
            ..Default::default()
        }
    }

    fn summary(trace_id: &str, duration: i64) -> TraceSummary {
        summarize(&[span(trace_id, "a", None, Some(1_000), Some(duration), "frontend")]).unwrap()
    }

    #[test]
    fn empty_or_untimed_traces_have_no_summary() {
        assert_eq!(summarize(&[]), None);
        assert_eq!(summarize(&[span("1", "a", None, None, None, "frontend")]), None);
    }

    #[test]
    fn summarizes_duration_services_and_root() {
        let spans = vec![
            span("1", "a", None, Some(100), Some(1_000), "frontend"),
            span("1", "b", Some("a"), Some(200), Some(300), "backend"),
            span("1", "c", Some("a"), Some(900), Some(600), "backend"),
            span("1", "d", Some("a"), Some(950), None, "frontend"),
        ];
        let options = SummaryOptions {
            utc: true,
            ..Default::default()
        };
        let summary = summarize_with(&spans, &options).unwrap();

        assert_eq!(summary.timestamp, 100);
        assert_eq!(summary.duration, 1_400);
        assert_eq!(summary.duration_str, "1.400ms");
        assert_eq!(summary.span_count, 4);
        assert_eq!(summary.root.service_name, "frontend");
        assert_eq!(
            summary.service_summaries,
            vec![
                ServiceSummary {
                    service_name: "frontend".into(),
                    span_count: 2,
                    max_span_duration_str: "1.000ms".into(),
                },
                ServiceSummary {
                    service_name: "backend".into(),
                    span_count: 2,
                    max_span_duration_str: "600μ".into(),
                },
            ]
        );
        assert_eq!(summary.start_ts, "01-01-1970T00:00:00.000+0000");
    }

    #[test]
    fn headless_summary_has_unknown_root() {
        let spans = vec![span("1", "b", Some("missing"), Some(100), Some(10), "backend")];
        assert_eq!(summarize(&spans).unwrap().root, RootSpanName::unknown());
    }

    #[test]
    fn classifies_errors() {
        let mut critical = span("1", "a", None, Some(1), Some(1), "frontend");
        critical.tags.insert("error".into(), "".into());
        let mut transient = span("2", "a", None, Some(1), Some(1), "frontend");
        transient.annotations.push(Annotation {
            timestamp: 1,
            value: "error".into(),
            endpoint: None,
        });
        let clean = span("3", "a", None, Some(1), Some(1), "frontend");

        assert_eq!(summarize(&[transient.clone(), critical.clone()]).unwrap().info_class, "trace-error-critical");
        assert_eq!(summarize(&[transient]).unwrap().info_class, "trace-error-transient");
        assert_eq!(summarize(&[clean]).unwrap().error_type, ErrorType::None);
    }

    #[test]
    fn service_percentage_uses_interval_union() {
        let spans = vec![
            span("1", "a", None, Some(0), Some(1_000), "frontend"),
            span("1", "b", Some("a"), Some(100), Some(200), "backend"),
            span("1", "c", Some("a"), Some(200), Some(200), "backend"),
            span("1", "d", Some("a"), Some(700), Some(100), "backend"),
        ];
        let options = SummaryOptions {
            service_name: Some("backend".into()),
            utc: true,
        };
        assert_eq!(summarize_with(&spans, &options).unwrap().service_percentage, Some(40));

        let options = SummaryOptions {
            service_name: Some("mysql".into()),
            utc: true,
        };
        assert_eq!(summarize_with(&spans, &options).unwrap().service_percentage, None);
    }

    #[test]
    fn untimed_spans_count_but_take_no_time() {
        let spans = vec![
            span("1", "a", None, Some(1_000), Some(1_000), "frontend"),
            span("1", "b", Some("a"), Some(1_100), Some(100), "backend"),
            span("1", "c", Some("a"), None, Some(5_000), "backend"),
        ];
        let options = SummaryOptions {
            service_name: Some("backend".into()),
            utc: true,
        };
        let summary = summarize_with(&spans, &options).unwrap();

        assert_eq!(summary.duration, 1_000);
        assert_eq!(summary.service_percentage, Some(10));
        let backend = summary
            .service_summaries
            .iter()
            .find(|s| s.service_name == "backend")
            .unwrap();
        assert_eq!(backend.span_count, 2);
    }

    #[test]
    fn merges_overlapping_intervals() {
        assert_eq!(total_duration(&[]), 0);
        assert_eq!(total_duration(&[(10, 5)]), 5);
        assert_eq!(total_duration(&[(0, 10), (5, 10), (2, 3), (30, 5), (40, 0)]), 20);
    }

    #[test]
    fn ranks_with_rounded_widths() {
        let ranked = rank_traces(
            vec![summary("a", 300), summary("b", 1_000), summary("c", 666)],
            SortOrder::LongestFirst,
        );
        let widths: Vec<(&str, u32)> = ranked.iter().map(|s| (s.trace_id.as_str(), s.width)).collect();
        assert_eq!(widths, vec![("b", 100), ("c", 67), ("a", 30)]);

        let ranked = rank_traces(ranked, SortOrder::ShortestFirst);
        assert_eq!(ranked[0].trace_id, "a");
    }

    #[test]
    fn ties_break_by_trace_id() {
        for order in &[SortOrder::LongestFirst, SortOrder::ShortestFirst, SortOrder::NewestFirst, SortOrder::OldestFirst] {
            let ranked = rank_traces(vec![summary("c", 5), summary("a", 5), summary("b", 5)], *order);
            let ids: Vec<&str> = ranked.iter().map(|s| s.trace_id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn orders_by_timestamp() {
        let early = summary("z", 5);
        let mut late = summary("a", 5);
        late.timestamp += 10;
        let ranked = rank_traces(vec![early.clone(), late.clone()], SortOrder::NewestFirst);
        assert_eq!(ranked[0].trace_id, "a");
        let ranked = rank_traces(vec![late, early], SortOrder::OldestFirst);
        assert_eq!(ranked[0].trace_id, "z");
    }

    #[test]
    fn zero_length_set_has_zero_width() {
        let mut s = summary("a", 5);
        s.duration = 0;
        assert_eq!(rank_traces(vec![s], SortOrder::default())[0].width, 0);
    }
}
