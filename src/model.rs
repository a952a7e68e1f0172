use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network context of a node in the service graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
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

impl Endpoint {
    pub fn named(service_name: &str) -> Self {
        Endpoint {
            service_name: Some(service_name.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.service_name().is_none() && self.ipv4.is_none() && self.ipv6.is_none() && self.port.is_none()
    }

    /// Service name, ignoring blank values.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref().filter(|s| !s.is_empty())
    }

    /// True only when both sides carry the same ipv4 or the same ipv6 address.
    pub fn ips_match(&self, other: &Endpoint) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        same(&self.ipv4, &other.ipv4) || same(&self.ipv6, &other.ipv6)
    }

    /// `ip:port (service)`, or just the service name when there is no address.
    pub fn display(&self) -> String {
        let ip = match (&self.ipv6, &self.ipv4) {
            (Some(v6), _) => format!("[{}]", v6),
            (None, Some(v4)) => v4.clone(),
            (None, None) => return self.service_name().unwrap_or_default().to_string(),
        };
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();
        match self.service_name() {
            Some(name) => format!("{}{} ({})", ip, port, name),
            None => format!("{}{}", ip, port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Client,
    Server,
    Producer,
    Consumer,
}

/// Which end of an RPC reported a piece of span data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Client,
    Server,
    Local,
}

/// The closed set of annotations with timing semantics. Anything else is kept
/// as a free-form [`Annotation`] on the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoreAnnotation {
    #[serde(rename = "cs")]
    ClientSend,
    #[serde(rename = "sr")]
    ServerReceive,
    #[serde(rename = "ss")]
    ServerSend,
    #[serde(rename = "cr")]
    ClientReceive,
    #[serde(rename = "ms")]
    MessageSend,
    #[serde(rename = "ws")]
    WireSend,
    #[serde(rename = "wr")]
    WireReceive,
    #[serde(rename = "mr")]
    MessageReceive,
}

impl CoreAnnotation {
    pub fn from_code(code: &str) -> Option<Self> {
        use CoreAnnotation::*;
        match code {
            "cs" => Some(ClientSend),
            "sr" => Some(ServerReceive),
            "ss" => Some(ServerSend),
            "cr" => Some(ClientReceive),
            "ms" => Some(MessageSend),
            "ws" => Some(WireSend),
            "wr" => Some(WireReceive),
            "mr" => Some(MessageReceive),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        use CoreAnnotation::*;
        match self {
            ClientSend => "cs",
            ServerReceive => "sr",
            ServerSend => "ss",
            ClientReceive => "cr",
            MessageSend => "ms",
            WireSend => "ws",
            WireReceive => "wr",
            MessageReceive => "mr",
        }
    }

    pub fn display_name(self) -> &'static str {
        use CoreAnnotation::*;
        match self {
            ClientSend => "Client Start",
            ServerReceive => "Server Start",
            ServerSend => "Server Finish",
            ClientReceive => "Client Finish",
            MessageSend => "Producer Start",
            WireSend => "Producer Finish",
            WireReceive => "Consumer Start",
            MessageReceive => "Consumer Finish",
        }
    }

    pub fn side(self) -> Side {
        use CoreAnnotation::*;
        match self {
            ClientSend | ClientReceive => Side::Client,
            ServerReceive | ServerSend => Side::Server,
            _ => Side::Local,
        }
    }

    /// Whether the annotation opens an interval (as opposed to closing one).
    pub fn is_begin(self) -> bool {
        use CoreAnnotation::*;
        matches!(self, ClientSend | ServerReceive | MessageSend | WireReceive)
    }

    pub fn is_messaging(self) -> bool {
        self.side() == Side::Local
    }

    pub fn kind(self) -> Kind {
        use CoreAnnotation::*;
        match self {
            ClientSend | ClientReceive => Kind::Client,
            ServerReceive | ServerSend => Kind::Server,
            MessageSend | WireSend => Kind::Producer,
            WireReceive | MessageReceive => Kind::Consumer,
        }
    }
}

/// Timestamped event on a span, in epoch microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Annotation {
    pub timestamp: i64,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

/// Address entries carried by legacy binary annotations (`sa`, `ca`, `ma`, `lc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressKind {
    #[serde(rename = "sa")]
    Server,
    #[serde(rename = "ca")]
    Client,
    #[serde(rename = "ma")]
    MessageBroker,
    #[serde(rename = "lc")]
    LocalComponent,
}

impl AddressKind {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "sa" => Some(AddressKind::Server),
            "ca" => Some(AddressKind::Client),
            "ma" => Some(AddressKind::MessageBroker),
            "lc" => Some(AddressKind::LocalComponent),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AddressKind::Server => "Server Address",
            AddressKind::Client => "Client Address",
            AddressKind::MessageBroker => "Message Address",
            AddressKind::LocalComponent => "Local Component",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub kind: AddressKind,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    None,
    Transient,
    Critical,
}

impl Default for ErrorType {
    fn default() -> Self {
        ErrorType::None
    }
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::None => "none",
            ErrorType::Transient => "transient",
            ErrorType::Critical => "critical",
        }
    }

    /// CSS class used by list views; empty when there is no error.
    pub fn info_class(self) -> String {
        match self {
            ErrorType::None => String::new(),
            other => format!("trace-error-{}", other.as_str()),
        }
    }
}

/// One record per (trace id, span id), after every reported fragment was merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalSpan {
    pub trace_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    /// Timing annotations, at most one per kind.
    #[serde(default)]
    pub core: BTreeMap<CoreAnnotation, Annotation>,
    /// Free-form annotations, sorted by (timestamp, value).
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    /// Every distinct endpoint seen on any fragment, in first-seen order.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub shared: bool,
    /// Which side reported `timestamp`/`duration`; `None` when derived from annotations.
    #[serde(skip)]
    pub timing_side: Option<Side>,
}

impl CanonicalSpan {
    pub fn core_ts(&self, kind: CoreAnnotation) -> Option<i64> {
        self.core.get(&kind).map(|a| a.timestamp)
    }

    /// `(cs, cr)` when the span observed a full client round trip.
    pub fn client_pair(&self) -> Option<(i64, i64)> {
        match (self.core_ts(CoreAnnotation::ClientSend), self.core_ts(CoreAnnotation::ClientReceive)) {
            (Some(cs), Some(cr)) if cr >= cs => Some((cs, cr)),
            _ => None,
        }
    }

    /// `(sr, ss)` when the span observed a full server round trip.
    pub fn server_pair(&self) -> Option<(i64, i64)> {
        match (self.core_ts(CoreAnnotation::ServerReceive), self.core_ts(CoreAnnotation::ServerSend)) {
            (Some(sr), Some(ss)) if ss >= sr => Some((sr, ss)),
            _ => None,
        }
    }

    pub fn has_side(&self, side: Side) -> bool {
        self.core.keys().any(|k| k.side() == side)
            || match side {
                Side::Client => self.kind == Some(Kind::Client),
                Side::Server => self.kind == Some(Kind::Server) || self.shared,
                Side::Local => false,
            }
    }

    /// Endpoint that reported the server half, if known.
    pub fn server_endpoint(&self) -> Option<&Endpoint> {
        self.core_endpoint(|k| k.side() == Side::Server)
            .or_else(|| self.local_endpoint.as_ref().filter(|_| self.has_side(Side::Server)))
    }

    /// Endpoint that reported the client half, if known.
    pub fn client_endpoint(&self) -> Option<&Endpoint> {
        self.core_endpoint(|k| k.side() == Side::Client)
            .or_else(|| self.local_endpoint.as_ref().filter(|_| !self.has_side(Side::Server)))
    }

    fn core_endpoint<F: Fn(CoreAnnotation) -> bool>(&self, pred: F) -> Option<&Endpoint> {
        self.core
            .iter()
            .filter(|(k, _)| pred(**k))
            .filter_map(|(_, a)| a.endpoint.as_ref())
            .next()
    }

    fn core_service_name<F: Fn(CoreAnnotation) -> bool>(&self, pred: F) -> Option<&str> {
        self.core
            .iter()
            .filter(|(k, _)| pred(**k))
            .filter_map(|(_, a)| a.endpoint.as_ref().and_then(Endpoint::service_name))
            .next()
    }

    fn address_service_name(&self, kind: AddressKind) -> Option<&str> {
        self.addresses
            .iter()
            .filter(|a| a.kind == kind)
            .filter_map(|a| a.endpoint.service_name())
            .next()
    }

    /// The single service name that owns this span.
    pub fn service_name(&self) -> Option<&str> {
        self.address_service_name(AddressKind::Server)
            .or_else(|| self.core_service_name(|k| k.side() == Side::Server))
            .or_else(|| self.core_service_name(CoreAnnotation::is_messaging))
            .or_else(|| self.address_service_name(AddressKind::Client))
            .or_else(|| self.core_service_name(|k| k.side() == Side::Client))
            .or_else(|| self.address_service_name(AddressKind::MessageBroker))
            .or_else(|| self.address_service_name(AddressKind::LocalComponent))
            .or_else(|| self.endpoints.iter().filter_map(Endpoint::service_name).next())
    }

    /// Distinct service names observed on this span, in first-seen order.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.endpoints.iter().filter_map(Endpoint::service_name) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn error_type(&self) -> ErrorType {
        if self.tags.contains_key("error") {
            ErrorType::Critical
        } else if self.annotations.iter().any(|a| a.value == "error") {
            ErrorType::Transient
        } else {
            ErrorType::None
        }
    }

    /// End of the reported interval, when both timestamp and duration are
    /// known and their sum fits in an `i64`.
    pub fn end(&self) -> Option<i64> {
        self.timestamp?.checked_add(self.duration?)
    }

    /// Moves every absolute timestamp by `delta`. Durations are untouched.
    pub fn shift(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(ts) = self.timestamp.as_mut() {
            *ts = ts.saturating_add(delta);
        }
        for a in self.core.values_mut().chain(self.annotations.iter_mut()) {
            a.timestamp = a.timestamp.saturating_add(delta);
        }
    }

    /// Moves only what the server host recorded: `sr`/`ss`, annotations logged
    /// from the server endpoint, and the span timestamp if the server reported it.
    pub fn shift_server_side(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        let server = self.server_endpoint().cloned();
        if self.timing_side == Some(Side::Server) {
            if let Some(ts) = self.timestamp.as_mut() {
                *ts = ts.saturating_add(delta);
            }
        }
        for (kind, a) in self.core.iter_mut() {
            if kind.side() == Side::Server {
                a.timestamp = a.timestamp.saturating_add(delta);
            }
        }
        if let Some(server) = server {
            for a in self.annotations.iter_mut() {
                if a.endpoint.as_ref() == Some(&server) {
                    a.timestamp = a.timestamp.saturating_add(delta);
                }
            }
        }
    }
}

/// Service and span name shown for a trace's root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootSpanName {
    pub service_name: String,
    pub span_name: String,
}

impl RootSpanName {
    pub fn unknown() -> Self {
        RootSpanName {
            service_name: "unknown".to_string(),
            span_name: "unknown".to_string(),
        }
    }

    pub fn of(span: &CanonicalSpan) -> Self {
        let service_name = span
            .local_endpoint
            .as_ref()
            .and_then(Endpoint::service_name)
            .or_else(|| span.remote_endpoint.as_ref().and_then(Endpoint::service_name))
            .or_else(|| span.service_name())
            .unwrap_or("unknown");
        RootSpanName {
            service_name: service_name.to_string(),
            span_name: span.name.clone().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}
