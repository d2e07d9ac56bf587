use std::collections::BTreeMap;

use shared::{
    error::SyncError,
    protocol::{Tag, TagPayload, ViewKind},
};
use tracing::{debug, warn};

/// Demultiplexes raw inbound frames into typed `(tag, payload)` pairs for
/// one view's registered tag set.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    view: ViewKind,
}

impl MessageRouter {
    pub fn new(view: ViewKind) -> Self {
        Self { view }
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    /// Decodes one frame. A frame that is not a JSON object is a protocol
    /// error and is dropped whole; within a well-formed frame, unknown
    /// tags, tags outside this view's set and payloads that miss their
    /// schema are dropped pair-wise with a diagnostic.
    ///
    /// Pairs are returned in lexicographic tag order, not wire order, so
    /// multi-tag frames dispatch deterministically.
    pub fn route(&self, raw: &str) -> Result<Vec<TagPayload>, SyncError> {
        let frame: serde_json::Value = serde_json::from_str(raw).map_err(SyncError::protocol)?;
        let serde_json::Value::Object(fields) = frame else {
            return Err(SyncError::Protocol(
                "frame is not a tag-to-payload object".to_string(),
            ));
        };

        let ordered: BTreeMap<String, serde_json::Value> = fields.into_iter().collect();
        if ordered.is_empty() {
            debug!(view = %self.view, "frame carried no tags");
        }

        let mut payloads = Vec::with_capacity(ordered.len());
        for (name, value) in ordered {
            let Some(tag) = Tag::parse(&name) else {
                warn!(tag = %name, view = %self.view, "unknown tag, dropping payload");
                continue;
            };
            if !self.view.tags().contains(&tag) {
                warn!(%tag, view = %self.view, "tag not registered for this view, dropping payload");
                continue;
            }
            match TagPayload::decode(tag, value) {
                Ok(payload) => payloads.push(payload),
                Err(err) => {
                    warn!(%tag, view = %self.view, error = %err, "payload does not match schema, dropping");
                }
            }
        }
        Ok(payloads)
    }
}
