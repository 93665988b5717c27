use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProjectId, TransitionError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    Url,
    File,
    Video,
    Image,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Status only moves forward; `cancelled` is the one lateral exit and is
    /// reachable from any non-terminal state. Re-asserting the current
    /// status is allowed so updates stay idempotent.
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Completed | Self::Error) => true,
            (from, Self::Cancelled) if !from.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TargetLevel {
    Elementary,
    JuniorHigh,
    Beginner,
    Intermediate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DetailLevel {
    Concise,
    Standard,
    Detailed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Html,
    Pdf,
    Epub,
    Markdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    Light,
    Dark,
    Colorful,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DocLanguage {
    Ja,
    En,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionSettings {
    pub target_level: TargetLevel,
    pub detail_level: DetailLevel,
    pub output_format: OutputFormat,
    pub theme: Theme,
    pub language: DocLanguage,
    pub include_images: bool,
    pub include_diagrams: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            target_level: TargetLevel::Beginner,
            detail_level: DetailLevel::Standard,
            output_format: OutputFormat::Html,
            theme: Theme::Light,
            language: DocLanguage::Ja,
            include_images: true,
            include_diagrams: true,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub input_type: InputType,
    pub input_source: String,
    pub status: ProjectStatus,
    pub settings: ConversionSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

impl Project {
    pub fn new(input: CreateProjectInput) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new_v4(),
            name: input.name,
            description: input.description.unwrap_or_default(),
            input_type: input.input_type,
            input_source: input.input_source,
            status: ProjectStatus::Pending,
            settings: input.settings.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            result_url: None,
        }
    }

    pub fn set_status(&mut self, next: ProjectStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                entity: "project",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        let now = Utc::now();
        if next == ProjectStatus::Completed && self.status != ProjectStatus::Completed {
            self.completed_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_type: InputType,
    pub input_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ConversionSettings>,
}

/// Sparse patch shape; absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}
