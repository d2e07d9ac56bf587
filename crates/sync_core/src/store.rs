use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use shared::{
    domain::{parse_history_timestamp, ConnectionState, MemberId, MemberSummary, PopulationMetrics},
    protocol::{Tag, TagPayload, ViewKind},
};

/// Accumulates the latest payload per tag for one subscription.
///
/// Replacement is whole-value: a new payload for a tag fully supersedes
/// the previous one, and payloads for other tags are never touched.
/// Readiness latches true once every tag in the view's readiness set has
/// arrived at least once and stays true from then on.
#[derive(Debug, Clone)]
pub struct ViewStateStore {
    view: ViewKind,
    values: BTreeMap<Tag, TagPayload>,
    ready: bool,
}

impl ViewStateStore {
    pub fn new(view: ViewKind) -> Self {
        Self {
            view,
            values: BTreeMap::new(),
            ready: false,
        }
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn apply(&mut self, payload: TagPayload) {
        self.values.insert(payload.tag(), payload);
        if !self.ready {
            self.ready = self
                .view
                .readiness()
                .iter()
                .all(|tag| self.values.contains_key(tag));
        }
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn get(&self, tag: Tag) -> Option<&TagPayload> {
        self.values.get(&tag)
    }

    pub fn snapshot(&self, connection: ConnectionState) -> ViewSnapshot {
        ViewSnapshot {
            view: self.view,
            values: self.values.clone(),
            ready: self.ready,
            connection,
        }
    }
}

/// Point-in-time copy of a subscription's state. Derived views are
/// computed on read; nothing here is display-formatted.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub view: ViewKind,
    pub values: BTreeMap<Tag, TagPayload>,
    pub ready: bool,
    pub connection: ConnectionState,
}

/// One reshaped row of the metrics history: a timestamp plus the named
/// metric values of that row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsPoint {
    pub timestamp: NaiveDateTime,
    pub values: BTreeMap<String, Option<f64>>,
}

impl ViewSnapshot {
    pub fn get(&self, tag: Tag) -> Option<&TagPayload> {
        self.values.get(&tag)
    }

    pub fn configuration(&self) -> Option<&str> {
        match self.values.get(&Tag::Configuration)? {
            TagPayload::Configuration(text) => Some(text),
            _ => None,
        }
    }

    pub fn initial_configuration(&self) -> Option<&str> {
        match self.values.get(&Tag::InitialConfiguration)? {
            TagPayload::InitialConfiguration(text) => Some(text),
            _ => None,
        }
    }

    pub fn current_metrics(&self) -> Option<&[PopulationMetrics]> {
        match self.values.get(&Tag::CurrentMetrics)? {
            TagPayload::CurrentMetrics(metrics) => Some(metrics),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&BTreeMap<MemberId, MemberSummary>> {
        match self.values.get(&Tag::Members)? {
            TagPayload::Members(members) => Some(members),
            _ => None,
        }
    }

    /// Members ordered by descending fitness, unevaluated members last,
    /// ties broken by ascending member id.
    pub fn members_by_fitness(&self) -> Vec<(&MemberId, &MemberSummary)> {
        let Some(members) = self.members() else {
            return Vec::new();
        };
        let mut entries: Vec<_> = members.iter().collect();
        entries.sort_by(|(id_a, a), (id_b, b)| {
            let by_fitness = match (a.fitness, b.fitness) {
                (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_fitness.then_with(|| id_a.cmp(id_b))
        });
        entries
    }

    /// Reshapes the column-oriented `detailed_metrics` history into
    /// time-ordered named rows. Rows without a parseable timestamp are
    /// skipped.
    pub fn metrics_history(&self) -> Vec<MetricsPoint> {
        let Some(TagPayload::DetailedMetrics(detailed)) = self.values.get(&Tag::DetailedMetrics)
        else {
            return Vec::new();
        };
        let history = &detailed.history;
        let timestamp_index = history
            .columns
            .iter()
            .position(|column| column == "timestamp")
            .unwrap_or(0);

        let mut points: Vec<MetricsPoint> = history
            .data
            .iter()
            .filter_map(|row| {
                let timestamp = parse_history_timestamp(row.get(timestamp_index)?)?;
                let values = history
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| *index != timestamp_index)
                    .map(|(index, column)| {
                        (column.clone(), row.get(index).and_then(|cell| cell.as_f64()))
                    })
                    .collect();
                Some(MetricsPoint { timestamp, values })
            })
            .collect();
        points.sort_by_key(|point| point.timestamp);
        points
    }
}
