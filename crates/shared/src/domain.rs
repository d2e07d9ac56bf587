use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Index of a population within the engine's population list. The engine
/// addresses populations positionally, so removing one shifts the indices
/// of those after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PopulationIndex(pub usize);

/// Opaque member identifier as assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of one connection instance.
///
/// Transitions are monotonic along `Idle -> Connecting -> Open` with
/// `Closed` and `Errored` terminal. `Closed` is reachable from every
/// non-terminal state because the owner may tear down before the
/// handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    /// Whether moving from `self` to `next` is a legal step of the state
    /// machine. Re-entering the current state is not a step.
    pub fn may_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Idle, Connecting) | (Idle, Closed) => true,
            (Connecting, Open) | (Connecting, Closed) | (Connecting, Errored) => true,
            (Open, Closed) | (Open, Errored) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Aggregate fitness statistics for one population, as published under the
/// `current_metrics` tag. The fitness fields are absent for populations
/// with no evaluated members (the engine serializes NaN as null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationMetrics {
    pub amount_of_members: u64,
    pub amount_of_evaluated_members: u64,
    pub amount_of_unevaluated_members: u64,
    #[serde(default)]
    pub fitness_minimum: Option<f64>,
    #[serde(default)]
    pub fitness_maximum: Option<f64>,
    #[serde(default)]
    pub fitness_median: Option<f64>,
    #[serde(default)]
    pub fitness_mean: Option<f64>,
    #[serde(default)]
    pub fitness_standard_deviation: Option<f64>,
}

/// Column-oriented metrics history as published under `detailed_metrics`.
/// The first column is `timestamp`; remaining columns are metric names.
/// Cell values are heterogeneous (timestamps arrive as strings), so rows
/// stay raw JSON until a consumer reshapes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub columns: Vec<String>,
    pub data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub current: PopulationMetrics,
    pub history: MetricsHistory,
}

/// One entry of a `members`, `genealogy_parents` or `genealogy_children`
/// map: the member's latest fitness and the endpoint URL a child
/// subscription for it would target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub fitness: Option<f64>,
    pub url: String,
}

/// Parses a history timestamp cell. The engine emits `str(datetime)`
/// (`2024-05-01 12:30:00.123456`) but numeric epoch milliseconds are
/// accepted too.
pub fn parse_history_timestamp(value: &serde_json::Value) -> Option<NaiveDateTime> {
    match value {
        serde_json::Value::String(text) => {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
        }
        serde_json::Value::Number(number) => {
            let millis = number.as_f64()?;
            DateTime::from_timestamp_millis(millis as i64).map(|ts| ts.naive_utc())
        }
        _ => None,
    }
}
