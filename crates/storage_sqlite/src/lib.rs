use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use core_types::{
    ConversionSettings, CreateDocumentInput, CreateProjectInput, Document, DocumentId,
    DocumentMetadata, DocumentSection, Project, ProjectId, ProjectStatus, UpdateProjectInput,
    Version, VersionDiff, VersionId, VersionParameters, content_hash, fingerprint_sections,
};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("project name must not be empty")]
    EmptyProjectName,
    #[error("document title must not be empty")]
    EmptyDocumentTitle,
    #[error("section `{title}` has heading level {level}; levels are 1..=6")]
    SectionLevelOutOfRange { title: String, level: u8 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("version {number} of document {document_id} not found")]
    VersionNotFound { document_id: DocumentId, number: u32 },
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.as_ref().to_string_lossy()
        ))?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                input_type TEXT NOT NULL,
                input_source TEXT NOT NULL,
                status TEXT NOT NULL,
                settings_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT,
                result_url TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                content_hash TEXT NOT NULL,
                version INTEGER NOT NULL,
                metadata_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL,
                level INTEGER NOT NULL,
                content TEXT NOT NULL,
                original_content TEXT NOT NULL,
                ord INTEGER NOT NULL,
                images_json TEXT NOT NULL,
                diagrams_json TEXT NOT NULL,
                FOREIGN KEY(document_id) REFERENCES documents(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                model_version TEXT NOT NULL,
                parameters_json TEXT NOT NULL,
                fingerprints_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                created_by TEXT NOT NULL,
                comment TEXT,
                UNIQUE(document_id, version_number),
                FOREIGN KEY(document_id) REFERENCES documents(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }

    pub async fn create_project(&self, input: CreateProjectInput) -> Result<Project> {
        if input.name.trim().is_empty() {
            return Err(StorageError::EmptyProjectName.into());
        }
        let project = Project::new(input);
        sqlx::query(
            r#"
            INSERT INTO projects(
                id, name, description, input_type, input_source, status, settings_json,
                created_at, updated_at, completed_at, error_message, result_url
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(serde_json::to_string(&project.input_type)?)
        .bind(&project.input_source)
        .bind(serde_json::to_string(&project.status)?)
        .bind(serde_json::to_string(&project.settings)?)
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .bind(None::<String>)
        .bind(None::<String>)
        .bind(None::<String>)
        .execute(&self.pool)
        .await?;
        Ok(project)
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_project_row).transpose()
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(map_project_row).collect()
    }

    /// Sparse patch: absent fields keep their stored value. Status changes go
    /// through the project state machine, so an illegal transition fails the
    /// whole update and nothing is written.
    pub async fn update_project(&self, id: ProjectId, patch: UpdateProjectInput) -> Result<Project> {
        let mut project = self.get_project(id).await?.ok_or(StorageError::NotFound {
            entity: "project",
            id,
        })?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(StorageError::EmptyProjectName.into());
            }
            project.name = name;
        }
        if let Some(description) = patch.description {
            project.description = description;
        }
        if let Some(status) = patch.status {
            project.set_status(status)?;
        }
        if let Some(error_message) = patch.error_message {
            project.error_message = Some(error_message);
        }
        if let Some(result_url) = patch.result_url {
            project.result_url = Some(result_url);
        }
        project.updated_at = Utc::now();

        self.write_project(&project).await?;
        Ok(project)
    }

    /// Idempotent: cancelling an already-cancelled project re-asserts the
    /// same status and succeeds. Cancelling a completed or errored project
    /// is an invalid transition.
    pub async fn cancel_project(&self, id: ProjectId) -> Result<Project> {
        let mut project = self.get_project(id).await?.ok_or(StorageError::NotFound {
            entity: "project",
            id,
        })?;
        project.set_status(ProjectStatus::Cancelled)?;
        self.write_project(&project).await?;
        Ok(project)
    }

    async fn write_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects SET
                name = ?2, description = ?3, status = ?4, settings_json = ?5,
                updated_at = ?6, completed_at = ?7, error_message = ?8, result_url = ?9
            WHERE id = ?1
            "#,
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(serde_json::to_string(&project.status)?)
        .bind(serde_json::to_string(&project.settings)?)
        .bind(project.updated_at.to_rfc3339())
        .bind(project.completed_at.map(|t| t.to_rfc3339()))
        .bind(&project.error_message)
        .bind(&project.result_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Creates the document at version 1 with a single seed section holding
    /// the raw extracted content, and snapshots that state as version 1.
    pub async fn create_document(&self, input: CreateDocumentInput) -> Result<Document> {
        if input.title.trim().is_empty() {
            return Err(StorageError::EmptyDocumentTitle.into());
        }
        let project = self
            .get_project(input.project_id)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "project",
                id: input.project_id,
            })?;

        let now = Utc::now();
        let sections = vec![DocumentSection::new(
            input.title.clone(),
            1,
            input.original_content,
            0,
        )];
        let mut document = Document {
            id: DocumentId::new_v4(),
            project_id: project.id,
            title: input.title,
            description: input.description,
            sections,
            content_hash: String::new(),
            version: 1,
            metadata: DocumentMetadata::default(),
            created_at: now,
            updated_at: now,
        };
        document.refresh_hash(&project.settings);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO documents(
                id, project_id, title, description, content_hash, version, metadata_json,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(document.id.to_string())
        .bind(document.project_id.to_string())
        .bind(&document.title)
        .bind(&document.description)
        .bind(&document.content_hash)
        .bind(document.version as i64)
        .bind(serde_json::to_string(&document.metadata)?)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for section in &document.sections {
            insert_section(&mut tx, document.id, section).await?;
        }
        let snapshot = version_snapshot(&document, &project.settings, "system", None);
        insert_version(&mut tx, &snapshot).await?;
        tx.commit().await?;

        Ok(document)
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let Some(row) = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let sections = self.load_sections(id).await?;
        Ok(Some(map_document_row(row, sections)?))
    }

    pub async fn list_documents(&self, project_id: ProjectId) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE project_id = ?1 ORDER BY created_at ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: DocumentId = Uuid::parse_str(row.get::<String, _>("id").as_str())?;
            let sections = self.load_sections(id).await?;
            documents.push(map_document_row(row, sections)?);
        }
        Ok(documents)
    }

    /// Replaces the document's sections, advances the version counter by
    /// exactly one, recomputes the content hash and records an immutable
    /// snapshot. All of it commits atomically or not at all.
    pub async fn update_sections(
        &self,
        document_id: DocumentId,
        sections: Vec<DocumentSection>,
        created_by: impl Into<String>,
        comment: Option<String>,
    ) -> Result<Document> {
        for section in &sections {
            if !(1..=6).contains(&section.level) {
                return Err(StorageError::SectionLevelOutOfRange {
                    title: section.title.clone(),
                    level: section.level,
                }
                .into());
            }
        }

        let mut document = self
            .get_document(document_id)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "document",
                id: document_id,
            })?;
        let project = self
            .get_project(document.project_id)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "project",
                id: document.project_id,
            })?;

        document.sections = sections;
        document.version += 1;
        document.updated_at = Utc::now();
        document.refresh_hash(&project.settings);
        let snapshot = version_snapshot(&document, &project.settings, created_by.into(), comment);

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sections WHERE document_id = ?1")
            .bind(document.id.to_string())
            .execute(&mut *tx)
            .await?;
        for section in &document.sections {
            insert_section(&mut tx, document.id, section).await?;
        }
        sqlx::query(
            r#"
            UPDATE documents SET content_hash = ?2, version = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(document.id.to_string())
        .bind(&document.content_hash)
        .bind(document.version as i64)
        .bind(document.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        insert_version(&mut tx, &snapshot).await?;
        tx.commit().await?;

        Ok(document)
    }

    pub async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<Version>> {
        let rows = sqlx::query(
            "SELECT * FROM versions WHERE document_id = ?1 ORDER BY version_number ASC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_version_row).collect()
    }

    pub async fn get_version(
        &self,
        document_id: DocumentId,
        number: u32,
    ) -> Result<Option<Version>> {
        let row = sqlx::query(
            "SELECT * FROM versions WHERE document_id = ?1 AND version_number = ?2",
        )
        .bind(document_id.to_string())
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_version_row).transpose()
    }

    pub async fn diff_versions(
        &self,
        document_id: DocumentId,
        from: u32,
        to: u32,
    ) -> Result<VersionDiff> {
        let from = self
            .get_version(document_id, from)
            .await?
            .ok_or(StorageError::VersionNotFound {
                document_id,
                number: from,
            })?;
        let to = self
            .get_version(document_id, to)
            .await?
            .ok_or(StorageError::VersionNotFound {
                document_id,
                number: to,
            })?;
        Ok(VersionDiff::between(&from, &to))
    }

    async fn load_sections(&self, document_id: DocumentId) -> Result<Vec<DocumentSection>> {
        let rows = sqlx::query(
            "SELECT * FROM sections WHERE document_id = ?1 ORDER BY ord ASC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_section_row).collect()
    }
}

async fn insert_section(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_id: DocumentId,
    section: &DocumentSection,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sections(
            id, document_id, title, level, content, original_content, ord,
            images_json, diagrams_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(section.id.to_string())
    .bind(document_id.to_string())
    .bind(&section.title)
    .bind(section.level as i64)
    .bind(&section.content)
    .bind(&section.original_content)
    .bind(section.order as i64)
    .bind(serde_json::to_string(&section.images)?)
    .bind(serde_json::to_string(&section.diagrams)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    version: &Version,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO versions(
            id, document_id, version_number, content, content_hash, prompt_version,
            model_version, parameters_json, fingerprints_json, created_at, created_by, comment
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(version.id.to_string())
    .bind(version.document_id.to_string())
    .bind(version.version_number as i64)
    .bind(&version.content)
    .bind(&version.content_hash)
    .bind(&version.prompt_version)
    .bind(&version.model_version)
    .bind(serde_json::to_string(&version.parameters)?)
    .bind(serde_json::to_string(&version.fingerprints)?)
    .bind(version.created_at.to_rfc3339())
    .bind(&version.created_by)
    .bind(&version.comment)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn version_snapshot(
    document: &Document,
    settings: &ConversionSettings,
    created_by: impl Into<String>,
    comment: Option<String>,
) -> Version {
    let content = document
        .sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Version {
        id: VersionId::new_v4(),
        document_id: document.id,
        version_number: document.version,
        content,
        content_hash: document.content_hash.clone(),
        prompt_version: document.metadata.prompt_version.clone(),
        model_version: document.metadata.model_version.clone(),
        parameters: VersionParameters {
            temperature: None,
            max_tokens: None,
            top_p: None,
            top_k: None,
            target_level: kebab(&settings.target_level),
            detail_level: kebab(&settings.detail_level),
            seed: None,
        },
        fingerprints: fingerprint_sections(&document.sections),
        created_at: document.updated_at,
        created_by: created_by.into(),
        comment,
    }
}

/// Serde wire name of a unit enum variant.
fn kebab<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

fn map_project_row(row: sqlx::sqlite::SqliteRow) -> Result<Project> {
    Ok(Project {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        name: row.get("name"),
        description: row.get("description"),
        input_type: serde_json::from_str(&row.get::<String, _>("input_type"))
            .context("invalid input type in database")?,
        input_source: row.get("input_source"),
        status: serde_json::from_str(&row.get::<String, _>("status"))
            .context("invalid project status in database")?,
        settings: serde_json::from_str(&row.get::<String, _>("settings_json"))
            .context("invalid settings in database")?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .map(parse_rfc3339)
            .transpose()?,
        error_message: row.get("error_message"),
        result_url: row.get("result_url"),
    })
}

fn map_document_row(row: sqlx::sqlite::SqliteRow, sections: Vec<DocumentSection>) -> Result<Document> {
    Ok(Document {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        project_id: Uuid::parse_str(row.get::<String, _>("project_id").as_str())?,
        title: row.get("title"),
        description: row.get("description"),
        sections,
        content_hash: row.get("content_hash"),
        version: row.get::<i64, _>("version") as u32,
        metadata: serde_json::from_str(&row.get::<String, _>("metadata_json"))
            .context("invalid document metadata in database")?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}

fn map_section_row(row: sqlx::sqlite::SqliteRow) -> Result<DocumentSection> {
    Ok(DocumentSection {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        title: row.get("title"),
        level: row.get::<i64, _>("level") as u8,
        content: row.get("content"),
        original_content: row.get("original_content"),
        order: row.get::<i64, _>("ord") as u32,
        images: serde_json::from_str(&row.get::<String, _>("images_json"))
            .context("invalid section images in database")?,
        diagrams: serde_json::from_str(&row.get::<String, _>("diagrams_json"))
            .context("invalid section diagrams in database")?,
    })
}

fn map_version_row(row: sqlx::sqlite::SqliteRow) -> Result<Version> {
    Ok(Version {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        document_id: Uuid::parse_str(row.get::<String, _>("document_id").as_str())?,
        version_number: row.get::<i64, _>("version_number") as u32,
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        prompt_version: row.get("prompt_version"),
        model_version: row.get("model_version"),
        parameters: serde_json::from_str(&row.get::<String, _>("parameters_json"))
            .context("invalid version parameters in database")?,
        fingerprints: serde_json::from_str(&row.get::<String, _>("fingerprints_json"))
            .context("invalid version fingerprints in database")?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        created_by: row.get("created_by"),
        comment: row.get("comment"),
    })
}

fn parse_rfc3339(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::InputType;

    fn create_input() -> CreateProjectInput {
        CreateProjectInput {
            name: "washing machine manual".into(),
            description: Some("drum model".into()),
            input_type: InputType::Url,
            input_source: "https://example.com/wm".into(),
            settings: None,
        }
    }

    async fn storage() -> SqliteStorage {
        SqliteStorage::in_memory().await.expect("storage")
    }

    #[tokio::test]
    async fn creates_and_reads_projects() {
        let storage = storage().await;
        assert_eq!(
            storage.schema_version().await.expect("schema version"),
            CURRENT_DB_SCHEMA_VERSION
        );

        let project = storage.create_project(create_input()).await.expect("create");
        assert_eq!(project.status, ProjectStatus::Pending);

        let loaded = storage
            .get_project(project.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.name, project.name);
        assert_eq!(loaded.settings, project.settings);
        assert_eq!(loaded.status, ProjectStatus::Pending);

        assert_eq!(storage.list_projects().await.expect("list").len(), 1);
        assert!(
            storage
                .get_project(ProjectId::new_v4())
                .await
                .expect("get missing")
                .is_none()
        );
    }

    #[tokio::test]
    async fn empty_project_name_is_rejected_before_any_write() {
        let storage = storage().await;
        let mut input = create_input();
        input.name = "   ".into();
        let err = storage.create_project(input).await.expect_err("reject");
        assert!(err.to_string().contains("must not be empty"));
        assert!(storage.list_projects().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn update_applies_sparse_patch_and_enforces_transitions() {
        let storage = storage().await;
        let project = storage.create_project(create_input()).await.expect("create");

        // pending -> completed skips processing and must fail.
        let err = storage
            .update_project(
                project.id,
                UpdateProjectInput {
                    status: Some(ProjectStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .expect_err("illegal transition");
        assert!(err.to_string().contains("invalid project transition"));

        let updated = storage
            .update_project(
                project.id,
                UpdateProjectInput {
                    status: Some(ProjectStatus::Processing),
                    description: Some("front loader".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("processing");
        assert_eq!(updated.status, ProjectStatus::Processing);
        assert_eq!(updated.description, "front loader");
        // Untouched fields survive the patch.
        assert_eq!(updated.name, project.name);

        let done = storage
            .update_project(
                project.id,
                UpdateProjectInput {
                    status: Some(ProjectStatus::Completed),
                    result_url: Some("https://example.com/out".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("completed");
        assert!(done.completed_at.is_some());
        assert_eq!(done.result_url.as_deref(), Some("https://example.com/out"));
    }

    #[tokio::test]
    async fn cancellation_is_idempotent_but_not_retroactive() {
        let storage = storage().await;
        let project = storage.create_project(create_input()).await.expect("create");

        let cancelled = storage.cancel_project(project.id).await.expect("cancel");
        assert_eq!(cancelled.status, ProjectStatus::Cancelled);
        let again = storage.cancel_project(project.id).await.expect("cancel again");
        assert_eq!(again.status, ProjectStatus::Cancelled);

        let done = storage.create_project(create_input()).await.expect("create");
        storage
            .update_project(
                done.id,
                UpdateProjectInput {
                    status: Some(ProjectStatus::Processing),
                    ..Default::default()
                },
            )
            .await
            .expect("processing");
        storage
            .update_project(
                done.id,
                UpdateProjectInput {
                    status: Some(ProjectStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .expect("completed");
        assert!(storage.cancel_project(done.id).await.is_err());
    }

    #[tokio::test]
    async fn document_starts_at_version_one_with_seed_section() {
        let storage = storage().await;
        let project = storage.create_project(create_input()).await.expect("create");
        let document = storage
            .create_document(CreateDocumentInput {
                project_id: project.id,
                title: "Washing Machine Guide".into(),
                description: None,
                original_content: "Load clothes. Add detergent. Start.".into(),
            })
            .await
            .expect("document");

        assert_eq!(document.version, 1);
        assert_eq!(document.sections.len(), 1);
        assert_eq!(document.sections[0].content, document.sections[0].original_content);
        assert_eq!(document.content_hash.len(), 64);

        let loaded = storage
            .get_document(document.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.content_hash, document.content_hash);
        assert_eq!(loaded.sections.len(), 1);

        let versions = storage.list_versions(document.id).await.expect("versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[0].content_hash, document.content_hash);
    }

    #[tokio::test]
    async fn updating_sections_bumps_version_by_exactly_one_and_snapshots() {
        let storage = storage().await;
        let project = storage.create_project(create_input()).await.expect("create");
        let document = storage
            .create_document(CreateDocumentInput {
                project_id: project.id,
                title: "Guide".into(),
                description: None,
                original_content: "raw text".into(),
            })
            .await
            .expect("document");

        let mut kept = document.sections[0].clone();
        kept.content = "Simplified: load, pour, press start.".into();
        let added = DocumentSection::new("Troubleshooting", 2, "If it beeps, close the door.", 1);
        let updated = storage
            .update_sections(
                document.id,
                vec![kept.clone(), added.clone()],
                "agent:gemini-pro",
                Some("simplified pass".into()),
            )
            .await
            .expect("update");

        assert_eq!(updated.version, document.version + 1);
        assert_ne!(updated.content_hash, document.content_hash);
        assert_eq!(updated.sections.len(), 2);

        let diff = storage
            .diff_versions(document.id, 1, 2)
            .await
            .expect("diff");
        assert_eq!(diff.added_sections, vec![added.id]);
        assert!(diff.removed_sections.is_empty());
        assert_eq!(diff.modified_sections, vec![kept.id]);

        let v2 = storage
            .get_version(document.id, 2)
            .await
            .expect("get version")
            .expect("present");
        assert_eq!(v2.created_by, "agent:gemini-pro");
        assert_eq!(v2.comment.as_deref(), Some("simplified pass"));
        assert!(v2.content.contains("Troubleshooting") || v2.content.contains("close the door"));
    }

    #[tokio::test]
    async fn out_of_range_heading_level_is_rejected() {
        let storage = storage().await;
        let project = storage.create_project(create_input()).await.expect("create");
        let document = storage
            .create_document(CreateDocumentInput {
                project_id: project.id,
                title: "Guide".into(),
                description: None,
                original_content: "raw".into(),
            })
            .await
            .expect("document");

        let bad = DocumentSection::new("Too deep", 7, "x", 0);
        let err = storage
            .update_sections(document.id, vec![bad], "user", None)
            .await
            .expect_err("reject");
        assert!(err.to_string().contains("levels are 1..=6"));
        // The rejected update left the document untouched.
        let loaded = storage
            .get_document(document.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.version, 1);
    }
}
