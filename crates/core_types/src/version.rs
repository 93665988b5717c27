use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{DocumentId, DocumentSection, SectionId, VersionId};

/// Generation parameters captured with each snapshot so a prior result can
/// be regenerated deterministically when the same seed and model version
/// are used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    pub target_level: String,
    pub detail_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Per-section identity and size captured at snapshot time, enough to diff
/// two versions without reloading section rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionFingerprint {
    pub id: SectionId,
    pub content_hash: String,
    pub chars: u64,
}

pub fn fingerprint_sections(sections: &[DocumentSection]) -> Vec<SectionFingerprint> {
    sections
        .iter()
        .map(|section| {
            let mut hasher = Sha256::new();
            hasher.update(section.title.as_bytes());
            hasher.update([0u8]);
            hasher.update(section.content.as_bytes());
            SectionFingerprint {
                id: section.id,
                content_hash: format!("{:x}", hasher.finalize()),
                chars: section.content.chars().count() as u64,
            }
        })
        .collect()
}

/// Immutable snapshot of a document's content at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub document_id: DocumentId,
    pub version_number: u32,
    pub content: String,
    pub content_hash: String,
    pub prompt_version: String,
    pub model_version: String,
    pub parameters: VersionParameters,
    pub fingerprints: Vec<SectionFingerprint>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionDiff {
    pub version_from: u32,
    pub version_to: u32,
    pub added_sections: Vec<SectionId>,
    pub removed_sections: Vec<SectionId>,
    pub modified_sections: Vec<SectionId>,
    pub char_diff: i64,
}

impl VersionDiff {
    pub fn between(from: &Version, to: &Version) -> Self {
        let from_map: BTreeMap<SectionId, &SectionFingerprint> =
            from.fingerprints.iter().map(|f| (f.id, f)).collect();
        let to_map: BTreeMap<SectionId, &SectionFingerprint> =
            to.fingerprints.iter().map(|f| (f.id, f)).collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        for (id, fp) in &to_map {
            match from_map.get(id) {
                None => added.push(*id),
                Some(old) if old.content_hash != fp.content_hash => modified.push(*id),
                Some(_) => {}
            }
        }
        let removed: Vec<SectionId> = from_map
            .keys()
            .filter(|id| !to_map.contains_key(id))
            .copied()
            .collect();

        let chars = |fps: &[SectionFingerprint]| fps.iter().map(|f| f.chars as i64).sum::<i64>();
        Self {
            version_from: from.version_number,
            version_to: to.version_number,
            added_sections: added,
            removed_sections: removed,
            modified_sections: modified,
            char_diff: chars(&to.fingerprints) - chars(&from.fingerprints),
        }
    }
}
