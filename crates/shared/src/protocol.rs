use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{DetailedMetrics, MemberId, MemberSummary, PopulationIndex, PopulationMetrics};

/// Discriminator of one semantic slice of inbound state. The set is closed:
/// a tag outside this enum is unknown to the dashboard and its payload is
/// dropped at the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    ComputationalCost,
    Configuration,
    CreationType,
    CurrentMetrics,
    DetailedMetrics,
    EvaluationResult,
    Fitness,
    GenealogyChildren,
    GenealogyParents,
    Genome,
    IndividualType,
    InitialConfiguration,
    Members,
}

impl Tag {
    pub const ALL: [Tag; 13] = [
        Tag::ComputationalCost,
        Tag::Configuration,
        Tag::CreationType,
        Tag::CurrentMetrics,
        Tag::DetailedMetrics,
        Tag::EvaluationResult,
        Tag::Fitness,
        Tag::GenealogyChildren,
        Tag::GenealogyParents,
        Tag::Genome,
        Tag::IndividualType,
        Tag::InitialConfiguration,
        Tag::Members,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::ComputationalCost => "computational_cost",
            Tag::Configuration => "configuration",
            Tag::CreationType => "creation_type",
            Tag::CurrentMetrics => "current_metrics",
            Tag::DetailedMetrics => "detailed_metrics",
            Tag::EvaluationResult => "evaluation_result",
            Tag::Fitness => "fitness",
            Tag::GenealogyChildren => "genealogy_children",
            Tag::GenealogyParents => "genealogy_parents",
            Tag::Genome => "genome",
            Tag::IndividualType => "individual_type",
            Tag::InitialConfiguration => "initial_configuration",
            Tag::Members => "members",
        }
    }

    pub fn parse(name: &str) -> Option<Tag> {
        Tag::ALL.into_iter().find(|tag| tag.as_str() == name)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload for one tag. Every known tag has exactly one schema; a
/// value that does not match it is a protocol violation for that pair.
///
/// `configuration` payloads are YAML documents carried as strings; the
/// genome, evaluation result and computational cost are individual-type
/// specific and stay raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum TagPayload {
    ComputationalCost(serde_json::Value),
    Configuration(String),
    CreationType(String),
    CurrentMetrics(Vec<PopulationMetrics>),
    DetailedMetrics(DetailedMetrics),
    EvaluationResult(serde_json::Value),
    Fitness(Option<f64>),
    GenealogyChildren(BTreeMap<MemberId, MemberSummary>),
    GenealogyParents(BTreeMap<MemberId, MemberSummary>),
    Genome(serde_json::Value),
    IndividualType(String),
    InitialConfiguration(String),
    Members(BTreeMap<MemberId, MemberSummary>),
}

impl TagPayload {
    /// Decodes `value` against the schema of `tag`.
    pub fn decode(tag: Tag, value: serde_json::Value) -> Result<TagPayload, serde_json::Error> {
        Ok(match tag {
            Tag::ComputationalCost => TagPayload::ComputationalCost(value),
            Tag::Configuration => TagPayload::Configuration(serde_json::from_value(value)?),
            Tag::CreationType => TagPayload::CreationType(serde_json::from_value(value)?),
            Tag::CurrentMetrics => TagPayload::CurrentMetrics(serde_json::from_value(value)?),
            Tag::DetailedMetrics => TagPayload::DetailedMetrics(serde_json::from_value(value)?),
            Tag::EvaluationResult => TagPayload::EvaluationResult(value),
            Tag::Fitness => TagPayload::Fitness(serde_json::from_value(value)?),
            Tag::GenealogyChildren => {
                TagPayload::GenealogyChildren(serde_json::from_value(value)?)
            }
            Tag::GenealogyParents => TagPayload::GenealogyParents(serde_json::from_value(value)?),
            Tag::Genome => TagPayload::Genome(value),
            Tag::IndividualType => TagPayload::IndividualType(serde_json::from_value(value)?),
            Tag::InitialConfiguration => {
                TagPayload::InitialConfiguration(serde_json::from_value(value)?)
            }
            Tag::Members => TagPayload::Members(serde_json::from_value(value)?),
        })
    }

    pub fn tag(&self) -> Tag {
        match self {
            TagPayload::ComputationalCost(_) => Tag::ComputationalCost,
            TagPayload::Configuration(_) => Tag::Configuration,
            TagPayload::CreationType(_) => Tag::CreationType,
            TagPayload::CurrentMetrics(_) => Tag::CurrentMetrics,
            TagPayload::DetailedMetrics(_) => Tag::DetailedMetrics,
            TagPayload::EvaluationResult(_) => Tag::EvaluationResult,
            TagPayload::Fitness(_) => Tag::Fitness,
            TagPayload::GenealogyChildren(_) => Tag::GenealogyChildren,
            TagPayload::GenealogyParents(_) => Tag::GenealogyParents,
            TagPayload::Genome(_) => Tag::Genome,
            TagPayload::IndividualType(_) => Tag::IndividualType,
            TagPayload::InitialConfiguration(_) => Tag::InitialConfiguration,
            TagPayload::Members(_) => Tag::Members,
        }
    }
}

/// Operator command. Serializes to a flat object carrying the payload
/// fields plus the command name under `type`, which is the exact outbound
/// frame shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AddPopulation { configuration: String },
    RemovePopulation { population_index: PopulationIndex },
    UpdateConfiguration { configuration: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddPopulation { .. } => "add_population",
            Command::RemovePopulation { .. } => "remove_population",
            Command::UpdateConfiguration { .. } => "update_configuration",
        }
    }
}

/// The view kinds a page can subscribe as. Each carries the tag set its
/// router accepts and the subset required before the view counts as loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    PopulationList,
    PopulationDetail,
    Individual,
}

impl ViewKind {
    /// Tags this view registers with its router. Anything else in a frame
    /// is dropped with a diagnostic.
    pub fn tags(self) -> &'static [Tag] {
        match self {
            ViewKind::PopulationList => &[Tag::InitialConfiguration, Tag::CurrentMetrics],
            ViewKind::PopulationDetail => &[
                Tag::Configuration,
                Tag::DetailedMetrics,
                Tag::IndividualType,
                Tag::Members,
            ],
            ViewKind::Individual => &[
                Tag::Genome,
                Tag::Configuration,
                Tag::Fitness,
                Tag::CreationType,
                Tag::EvaluationResult,
                Tag::ComputationalCost,
                Tag::GenealogyParents,
                Tag::GenealogyChildren,
            ],
        }
    }

    /// Tags that must all have arrived at least once for the view to be
    /// considered loaded.
    pub fn readiness(self) -> &'static [Tag] {
        match self {
            ViewKind::PopulationList => &[Tag::InitialConfiguration, Tag::CurrentMetrics],
            ViewKind::PopulationDetail => &[
                Tag::Configuration,
                Tag::DetailedMetrics,
                Tag::IndividualType,
                Tag::Members,
            ],
            ViewKind::Individual => &[Tag::Genome, Tag::Fitness, Tag::CreationType],
        }
    }
}

impl std::fmt::Display for ViewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ViewKind::PopulationList => "population_list",
            ViewKind::PopulationDetail => "population_detail",
            ViewKind::Individual => "individual",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_round_trip_through_serde() {
        for tag in Tag::ALL {
            let encoded = serde_json::to_value(tag).expect("serialize tag");
            assert_eq!(encoded, serde_json::Value::String(tag.as_str().to_string()));
            assert_eq!(Tag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(Tag::parse("telemetry"), None);
    }

    #[test]
    fn remove_population_serializes_to_flat_frame() {
        let command = Command::RemovePopulation {
            population_index: PopulationIndex(2),
        };
        let encoded = serde_json::to_value(&command).expect("serialize command");
        assert_eq!(
            encoded,
            serde_json::json!({"type": "remove_population", "population_index": 2})
        );
    }

    #[test]
    fn add_population_keeps_configuration_at_top_level() {
        let command = Command::AddPopulation {
            configuration: "maximum_amount_of_members: 100".to_string(),
        };
        let encoded = serde_json::to_value(&command).expect("serialize command");
        assert_eq!(
            encoded,
            serde_json::json!({
                "type": "add_population",
                "configuration": "maximum_amount_of_members: 100",
            })
        );
    }

    #[test]
    fn members_payload_decodes_as_typed_map() {
        let decoded = TagPayload::decode(
            Tag::Members,
            serde_json::json!({
                "m1": {"fitness": 0.8, "url": "/x"},
                "m2": {"fitness": null, "url": "/y"},
            }),
        )
        .expect("members payload");
        let TagPayload::Members(members) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[&MemberId::new("m1")].fitness, Some(0.8));
        assert_eq!(members[&MemberId::new("m2")].fitness, None);
    }

    #[test]
    fn mismatched_payload_schema_is_rejected() {
        assert!(TagPayload::decode(Tag::CurrentMetrics, serde_json::json!("not an array")).is_err());
        assert!(TagPayload::decode(Tag::Configuration, serde_json::json!(["not", "a", "string"]))
            .is_err());
    }

    #[test]
    fn fitness_accepts_null() {
        assert_eq!(
            TagPayload::decode(Tag::Fitness, serde_json::json!(null)).expect("null fitness"),
            TagPayload::Fitness(None)
        );
    }

    #[test]
    fn readiness_sets_are_subsets_of_registered_tags() {
        for view in [
            ViewKind::PopulationList,
            ViewKind::PopulationDetail,
            ViewKind::Individual,
        ] {
            for tag in view.readiness() {
                assert!(view.tags().contains(tag), "{view}: {tag} not registered");
            }
        }
    }
}
