use crate::{
    api::{RawSpan, V1Span, V2Span},
    model::{Address, AddressKind, Annotation, CanonicalSpan, CoreAnnotation, Endpoint, Kind, Side},
};
use log::{debug, trace};
use std::{
    cmp::Ordering,
    collections::{btree_map::Entry, HashMap},
};

/// Lower-cases and zero-pads a trace id to 16 or 32 hex characters. A 128-bit
/// id whose upper half is zero collapses to its 64-bit form.
pub fn normalize_trace_id(trace_id: &str) -> String {
    let id = trace_id.trim().to_ascii_lowercase();
    if id.len() > 16 {
        let padded = format!("{:0>32}", id);
        if padded.starts_with("0000000000000000") {
            padded[16..].to_string()
        } else {
            padded
        }
    } else {
        format!("{:0>16}", id)
    }
}

pub fn normalize_span_id(id: &str) -> String {
    format!("{:0>16}", id.trim().to_ascii_lowercase())
}

fn lower_half(trace_id: &str) -> &str {
    trace_id.get(trace_id.len().saturating_sub(16)..).unwrap_or(trace_id)
}

/// Maps each 64-bit trace id to the one 128-bit id that ends in it. A lower
/// half shared by several 128-bit ids is left unresolved.
fn widened_trace_ids(fragments: &[CanonicalSpan]) -> HashMap<String, String> {
    let mut candidates: HashMap<&str, Vec<&str>> = HashMap::new();
    for f in fragments.iter().filter(|f| f.trace_id.len() > 16) {
        let ids = candidates.entry(lower_half(&f.trace_id)).or_insert_with(Vec::new);
        if !ids.contains(&f.trace_id.as_str()) {
            ids.push(&f.trace_id);
        }
    }
    candidates
        .into_iter()
        .filter(|(_, ids)| ids.len() == 1)
        .map(|(low, ids)| (low.to_string(), ids[0].to_string()))
        .collect()
}

fn clean_name(name: &Option<String>) -> Option<String> {
    name.as_ref()
        .filter(|n| !n.is_empty() && n.as_str() != "unknown")
        .cloned()
}

fn clean_endpoint(endpoint: &Option<Endpoint>) -> Option<Endpoint> {
    endpoint.as_ref().filter(|e| !e.is_empty()).cloned()
}

fn positive(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0)
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Keeps the earliest begin annotation and the latest end annotation.
fn put_core(core: &mut std::collections::BTreeMap<CoreAnnotation, Annotation>, kind: CoreAnnotation, a: Annotation) {
    match core.entry(kind) {
        Entry::Vacant(e) => {
            e.insert(a);
        }
        Entry::Occupied(mut e) => {
            let replace = if kind.is_begin() {
                a.timestamp < e.get().timestamp
            } else {
                a.timestamp > e.get().timestamp
            };
            if replace {
                e.insert(a);
            }
        }
    }
}

fn core_annotation(kind: CoreAnnotation, timestamp: i64, endpoint: &Option<Endpoint>) -> Annotation {
    Annotation {
        timestamp,
        value: kind.code().to_string(),
        endpoint: endpoint.clone(),
    }
}

fn clean_ids(span: &mut CanonicalSpan, trace_id: &str, id: &str, parent_id: &Option<String>) {
    span.trace_id = normalize_trace_id(trace_id);
    span.id = normalize_span_id(id);
    // a span can't be its own parent, even when the input says so
    span.parent_id = parent_id
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(normalize_span_id)
        .filter(|p| *p != span.id);
}

fn from_v2(raw: &V2Span) -> CanonicalSpan {
    let mut span = CanonicalSpan::default();
    clean_ids(&mut span, &raw.trace_id, &raw.id, &raw.parent_id);
    span.name = clean_name(&raw.name);
    span.kind = raw.kind;
    span.timestamp = positive(raw.timestamp);
    span.duration = positive(raw.duration);
    span.local_endpoint = clean_endpoint(&raw.local_endpoint);
    span.remote_endpoint = clean_endpoint(&raw.remote_endpoint);
    span.debug = raw.debug;
    // shared is for the server side, unset it if accidentally set elsewhere
    span.shared = raw.shared && raw.kind != Some(Kind::Client);

    let local = span.local_endpoint.clone();
    if let Some(ts) = span.timestamp {
        let end = span.end();
        let (begin, finish) = match raw.kind {
            Some(Kind::Client) => (Some(CoreAnnotation::ClientSend), Some(CoreAnnotation::ClientReceive)),
            Some(Kind::Server) => (Some(CoreAnnotation::ServerReceive), Some(CoreAnnotation::ServerSend)),
            Some(Kind::Producer) => (Some(CoreAnnotation::MessageSend), Some(CoreAnnotation::WireSend)),
            Some(Kind::Consumer) if end.is_some() => {
                (Some(CoreAnnotation::WireReceive), Some(CoreAnnotation::MessageReceive))
            }
            Some(Kind::Consumer) => (Some(CoreAnnotation::MessageReceive), None),
            None => (None, None),
        };
        if let Some(begin) = begin {
            put_core(&mut span.core, begin, core_annotation(begin, ts, &local));
        }
        if let (Some(finish), Some(end)) = (finish, end) {
            put_core(&mut span.core, finish, core_annotation(finish, end, &local));
        }
        span.timing_side = Some(match raw.kind {
            Some(Kind::Client) => Side::Client,
            Some(Kind::Server) => Side::Server,
            _ if span.shared => Side::Server,
            _ => Side::Local,
        });
    }

    for a in &raw.annotations {
        let annotation = Annotation {
            timestamp: a.timestamp,
            value: a.value.clone(),
            endpoint: local.clone(),
        };
        match CoreAnnotation::from_code(&a.value) {
            Some(kind) => put_core(&mut span.core, kind, annotation),
            None => span.annotations.push(annotation),
        }
    }
    span.tags = raw.tags.clone();

    if let Some(remote) = &span.remote_endpoint {
        let kind = match raw.kind {
            Some(Kind::Server) => AddressKind::Client,
            Some(Kind::Producer) | Some(Kind::Consumer) => AddressKind::MessageBroker,
            Some(Kind::Client) | None => AddressKind::Server,
        };
        span.addresses.push(Address {
            kind,
            endpoint: remote.clone(),
        });
    }
    // an in-process span only has its local endpoint to attribute it by
    if let Some(local) = &local {
        if span.core.is_empty() && span.annotations.is_empty() && span.tags.is_empty() {
            span.addresses.push(Address {
                kind: AddressKind::LocalComponent,
                endpoint: local.clone(),
            });
        }
    }

    for ep in span.local_endpoint.iter().chain(span.remote_endpoint.iter()) {
        push_unique(&mut span.endpoints, ep.clone());
    }
    span
}

fn from_v1(raw: &V1Span) -> CanonicalSpan {
    let mut span = CanonicalSpan::default();
    clean_ids(&mut span, &raw.trace_id, &raw.id, &raw.parent_id);
    span.name = clean_name(&raw.name);
    span.timestamp = positive(raw.timestamp);
    span.duration = positive(raw.duration);
    span.debug = raw.debug;

    let mut endpoints: Vec<Endpoint> = Vec::new();
    for a in &raw.annotations {
        let endpoint = clean_endpoint(&a.endpoint);
        if let Some(ep) = &endpoint {
            push_unique(&mut endpoints, ep.clone());
        }
        let annotation = Annotation {
            timestamp: a.timestamp,
            value: a.value.clone(),
            endpoint,
        };
        match CoreAnnotation::from_code(&a.value) {
            Some(kind) => put_core(&mut span.core, kind, annotation),
            None => span.annotations.push(annotation),
        }
    }

    for b in &raw.binary_annotations {
        let endpoint = clean_endpoint(&b.endpoint);
        if let Some(ep) = &endpoint {
            push_unique(&mut endpoints, ep.clone());
        }
        match (AddressKind::from_key(&b.key), endpoint) {
            (Some(AddressKind::LocalComponent), endpoint) => {
                if let Some(endpoint) = endpoint {
                    push_unique(
                        &mut span.addresses,
                        Address {
                            kind: AddressKind::LocalComponent,
                            endpoint,
                        },
                    );
                }
                span.tags.insert(b.key.clone(), b.value_string());
            }
            (Some(kind), Some(endpoint)) => push_unique(&mut span.addresses, Address { kind, endpoint }),
            // an address without an endpoint carries nothing
            (Some(_), None) => {}
            (None, _) => {
                span.tags.insert(b.key.clone(), b.value_string());
            }
        }
    }

    span.kind = infer_kind(&span);
    span.local_endpoint = span
        .server_endpoint()
        .or_else(|| span.core.values().filter_map(|a| a.endpoint.as_ref()).next())
        .or_else(|| {
            span.addresses
                .iter()
                .find(|a| a.kind == AddressKind::LocalComponent)
                .map(|a| &a.endpoint)
        })
        .or_else(|| endpoints.first())
        .cloned();
    let remote_kind = match span.kind {
        Some(Kind::Client) => Some(AddressKind::Server),
        Some(Kind::Server) => Some(AddressKind::Client),
        Some(Kind::Producer) | Some(Kind::Consumer) => Some(AddressKind::MessageBroker),
        None => None,
    };
    span.remote_endpoint = remote_kind.and_then(|kind| {
        span.addresses
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.endpoint.clone())
    });
    if span.timestamp.is_some() {
        span.timing_side = Some(if span.has_side(Side::Client) {
            Side::Client
        } else if span.has_side(Side::Server) {
            Side::Server
        } else {
            Side::Local
        });
    }

    for ep in span.local_endpoint.iter().chain(endpoints.iter()) {
        push_unique(&mut span.endpoints, ep.clone());
    }
    for a in &span.addresses {
        push_unique(&mut span.endpoints, a.endpoint.clone());
    }
    span
}

// The client kind wins when both halves of an RPC are present.
fn infer_kind(span: &CanonicalSpan) -> Option<Kind> {
    [Kind::Client, Kind::Server, Kind::Producer, Kind::Consumer]
        .iter()
        .copied()
        .find(|kind| span.core.keys().any(|k| k.kind() == *kind))
}

fn to_canonical(raw: &RawSpan) -> CanonicalSpan {
    match raw {
        RawSpan::V1(span) => from_v1(span),
        RawSpan::V2(span) => from_v2(span),
    }
}

fn fragment_side(span: &CanonicalSpan) -> Side {
    if span.has_side(Side::Client) {
        Side::Client
    } else if span.has_side(Side::Server) {
        Side::Server
    } else {
        Side::Local
    }
}

fn side_rank(side: Side) -> u8 {
    match side {
        Side::Client => 0,
        Side::Local => 1,
        Side::Server => 2,
    }
}

/// Folds every fragment of one (trace id, span id) into a single span.
///
/// Timing comes from the server fragment when it reports a duration, then the
/// client's, then any other reporter; failing all of those it spans the
/// observed annotations. The local endpoint prefers the server's.
pub fn merge(mut fragments: Vec<CanonicalSpan>) -> CanonicalSpan {
    fragments.sort_by_key(|f| side_rank(fragment_side(f)));
    let mut merged = CanonicalSpan::default();

    let server = || fragments.iter().filter(|f| fragment_side(f) == Side::Server);
    merged.trace_id = fragments
        .iter()
        .map(|f| &f.trace_id)
        .max_by_key(|t| t.len())
        .cloned()
        .unwrap_or_default();
    merged.id = fragments.first().map(|f| f.id.clone()).unwrap_or_default();
    merged.parent_id = fragments.iter().find_map(|f| f.parent_id.clone());
    merged.name = server()
        .find_map(|f| f.name.clone())
        .or_else(|| fragments.iter().find_map(|f| f.name.clone()));
    merged.kind = fragments.iter().find_map(|f| f.kind);
    merged.local_endpoint = server()
        .find_map(|f| f.local_endpoint.clone())
        .or_else(|| fragments.iter().find_map(|f| f.local_endpoint.clone()));
    merged.remote_endpoint = fragments.iter().find_map(|f| f.remote_endpoint.clone());

    for f in &fragments {
        for (kind, a) in &f.core {
            put_core(&mut merged.core, *kind, a.clone());
        }
        merged.annotations.extend(f.annotations.iter().cloned());
        merged.tags.extend(f.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        for a in &f.addresses {
            push_unique(&mut merged.addresses, a.clone());
        }
        for ep in &f.endpoints {
            push_unique(&mut merged.endpoints, ep.clone());
        }
        merged.debug |= f.debug;
        merged.shared |= f.shared;
    }
    merged.annotations.sort();
    merged.annotations.dedup();

    let by_side = |side: Side, need_duration: bool| {
        fragments
            .iter()
            .find(|f| f.timing_side == Some(side) && f.timestamp.is_some() && (!need_duration || f.duration.is_some()))
    };
    let reported = [true, false].iter().find_map(|need_duration| {
        [Side::Server, Side::Client, Side::Local]
            .iter()
            .find_map(|side| by_side(*side, *need_duration))
    });
    match reported {
        Some(f) => {
            merged.timestamp = f.timestamp;
            merged.duration = f.duration;
            merged.timing_side = f.timing_side;
        }
        None => {
            let observed = merged.core.values().chain(merged.annotations.iter()).map(|a| a.timestamp);
            let (min, max) = observed.fold((None, None), |(min, max): (Option<i64>, Option<i64>), ts| {
                (Some(min.map_or(ts, |m| m.min(ts))), Some(max.map_or(ts, |m| m.max(ts))))
            });
            merged.timestamp = min;
            merged.duration = match (min, max) {
                (Some(min), Some(max)) if max > min => max.checked_sub(min),
                _ => None,
            };
            merged.timing_side = None;
        }
    }

    if fragments.len() > 1 {
        trace!(
            "merged {} fragments of span {}/{}",
            fragments.len(),
            merged.trace_id,
            merged.id
        );
    }
    merged
}

/// Turns raw spans of either shape into one canonical span per (trace id, span id),
/// in the order each key was first reported.
#[tracing::instrument(skip_all, fields(spans = raw.len()))]
pub fn normalize(raw: &[RawSpan]) -> Vec<CanonicalSpan> {
    let fragments: Vec<CanonicalSpan> = raw.iter().map(to_canonical).collect();

    // a trace reported in both 64 and 128-bit forms takes the longer one
    let widened = widened_trace_ids(&fragments);

    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<CanonicalSpan>> = HashMap::new();
    for mut f in fragments {
        if let Some(trace_id) = widened.get(&f.trace_id) {
            f.trace_id = trace_id.clone();
        }
        let key = (f.trace_id.clone(), f.id.clone());
        match groups.get_mut(&key) {
            Some(group) => group.push(f),
            None => {
                order.push(key.clone());
                groups.insert(key, vec![f]);
            }
        }
    }

    let spans: Vec<CanonicalSpan> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(merge)
        .collect();
    debug!("normalized {} raw spans into {} spans", raw.len(), spans.len());
    spans
}

/// Root spans first, then by timestamp (missing first), then by name.
pub fn span_comparator(a: &CanonicalSpan, b: &CanonicalSpan) -> Ordering {
    match (a.parent_id.is_none(), b.parent_id.is_none()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)),
    }
}
