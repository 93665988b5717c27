use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ConversionSettings, DiagramId, DocumentId, ImageId, ProjectId, SectionId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ImageKind {
    Illustration,
    Screenshot,
    Icon,
    Photo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentImage {
    pub id: ImageId,
    pub url: String,
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub kind: ImageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiagramKind {
    Flowchart,
    Sequence,
    Gantt,
    Mindmap,
    Er,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDiagram {
    pub id: DiagramId,
    pub title: String,
    pub kind: DiagramKind,
    pub mermaid_code: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One heading-delimited unit of a document. `order` establishes the
/// presentation order independent of storage order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSection {
    pub id: SectionId,
    pub title: String,
    pub level: u8,
    pub content: String,
    pub original_content: String,
    pub order: u32,
    #[serde(default)]
    pub images: Vec<DocumentImage>,
    #[serde(default)]
    pub diagrams: Vec<DocumentDiagram>,
}

impl DocumentSection {
    pub fn new(title: impl Into<String>, level: u8, original_content: impl Into<String>, order: u32) -> Self {
        let original_content = original_content.into();
        Self {
            id: SectionId::new_v4(),
            title: title.into(),
            level,
            content: original_content.clone(),
            original_content,
            order,
            images: Vec::new(),
            diagrams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_size: Option<u64>,
    pub word_count: u64,
    /// Minutes.
    pub estimated_reading_time: u64,
    pub complexity: Complexity,
    #[serde(default)]
    pub topics: Vec<String>,
    pub prompt_version: String,
    pub model_version: String,
    /// Seconds.
    pub processing_time: u64,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            original_url: None,
            original_file_name: None,
            original_file_size: None,
            word_count: 0,
            estimated_reading_time: 0,
            complexity: Complexity::Low,
            topics: Vec::new(),
            prompt_version: String::new(),
            model_version: String::new(),
            processing_time: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sections: Vec<DocumentSection>,
    pub content_hash: String,
    pub version: u32,
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn refresh_hash(&mut self, settings: &ConversionSettings) {
        self.content_hash = content_hash(&self.sections, settings);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentInput {
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub original_content: String,
}

/// Deterministic digest over the ordered section content and the conversion
/// settings. Identical (content, settings) pairs always hash to the same
/// value, so a regeneration run can be verified against a stored hash.
pub fn content_hash(sections: &[DocumentSection], settings: &ConversionSettings) -> String {
    let mut ordered: Vec<&DocumentSection> = sections.iter().collect();
    ordered.sort_by_key(|section| section.order);

    let mut hasher = Sha256::new();
    for section in ordered {
        hasher.update(section.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(section.content.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(serde_json::to_vec(settings).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}
