use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::store::{CollabStore, StoreError};
use crate::models::{
    CollaborationEvent, CollaborationSession, DocumentVersion, DocumentVersionSummary, NewDocumentVersion,
    NewEvent, NewSession, PresenceState, SessionParticipant,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS collab_sessions (
        session_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        document_type TEXT NOT NULL,
        document_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_activity TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collab_participants (
        id UUID PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES collab_sessions(session_id),
        user_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        color TEXT NOT NULL,
        cursor_position JSONB,
        selection JSONB,
        presence JSONB NOT NULL DEFAULT '{"status":"active"}',
        joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_active TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        left_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS collab_participants_session_user
        ON collab_participants(session_id, user_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collab_document_versions (
        id UUID PRIMARY KEY,
        session_id TEXT NOT NULL,
        document_type TEXT NOT NULL,
        document_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        snapshot BYTEA NOT NULL,
        state BYTEA NOT NULL,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        metadata JSONB NOT NULL DEFAULT '{}',
        UNIQUE (document_type, document_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collab_events (
        id UUID PRIMARY KEY,
        session_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        client_id TEXT NOT NULL,
        payload JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS collab_events_session_created
        ON collab_events(session_id, created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS collab_events_created
        ON collab_events(created_at)
    "#,
];

const PARTICIPANT_COLUMNS: &str = "session_id, user_id, display_name, is_active, color, cursor_position, \
     selection, presence, joined_at, last_active, left_at";

const VERSION_COLUMNS: &str =
    "id, session_id, document_type, document_id, version, snapshot, state, created_by, created_at, metadata";

/// PostgreSQL backed collaboration store
pub struct PgCollabStore {
    pool: PgPool,
}

impl PgCollabStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the collaboration tables if they do not exist yet
    pub async fn migrate(&self) -> Result<(), SqlxError> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("Collaboration schema is up to date");
        Ok(())
    }

    fn log_pool(&self, action: &str, subject: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{} {}. Pool connections: {} idle, {} in use",
            action,
            subject,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, StoreError> {
        match self.pool.begin().await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool: {}. Pool state: {} idle, {} total",
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                Err(e.into())
            }
        }
    }
}

fn session_from_row(row: &PgRow) -> Result<CollaborationSession, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(CollaborationSession {
        session_id: row.try_get("session_id")?,
        name: row.try_get("name")?,
        document_type: row.try_get("document_type")?,
        document_id: row.try_get("document_id")?,
        owner_id: row.try_get("owner_id")?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at")?,
        last_activity: row.try_get("last_activity")?,
    })
}

fn participant_from_row(row: &PgRow) -> Result<SessionParticipant, StoreError> {
    let cursor_position: Option<Json<Value>> = row.try_get("cursor_position")?;
    let selection: Option<Json<Value>> = row.try_get("selection")?;
    let presence: Json<Value> = row.try_get("presence")?;
    Ok(SessionParticipant {
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        display_name: row.try_get("display_name")?,
        is_active: row.try_get("is_active")?,
        color: row.try_get("color")?,
        cursor_position: cursor_position.map(|j| j.0),
        selection: selection.map(|j| j.0),
        presence: serde_json::from_value::<PresenceState>(presence.0)?,
        joined_at: row.try_get("joined_at")?,
        last_active: row.try_get("last_active")?,
        left_at: row.try_get::<Option<DateTime<Utc>>, _>("left_at")?,
    })
}

fn version_from_row(row: &PgRow) -> Result<DocumentVersion, StoreError> {
    let metadata: Json<Value> = row.try_get("metadata")?;
    Ok(DocumentVersion {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        document_type: row.try_get("document_type")?,
        document_id: row.try_get("document_id")?,
        version: row.try_get("version")?,
        snapshot: row.try_get("snapshot")?,
        state: row.try_get("state")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        metadata: metadata.0,
    })
}

fn event_from_row(row: &PgRow) -> Result<CollaborationEvent, StoreError> {
    let event_type: String = row.try_get("event_type")?;
    let payload: Json<Value> = row.try_get("payload")?;
    Ok(CollaborationEvent {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        event_type: event_type.parse().map_err(StoreError::Corrupt)?,
        client_id: row.try_get("client_id")?,
        payload: payload.0,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CollabStore for PgCollabStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<CollaborationSession>, StoreError> {
        self.log_pool("Loading session", session_id);
        let row = sqlx::query("SELECT * FROM collab_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn create_session(&self, new_session: NewSession) -> Result<CollaborationSession, StoreError> {
        self.log_pool("Creating session", &new_session.session_id);
        let mut tx = self.begin().await?;
        let query_sql = r#"
            INSERT INTO collab_sessions(session_id, name, document_type, document_id, owner_id, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            RETURNING *;
        "#;
        let row = sqlx::query(query_sql)
            .bind(&new_session.session_id)
            .bind(&new_session.name)
            .bind(&new_session.document_type)
            .bind(&new_session.document_id)
            .bind(&new_session.owner_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                SqlxError::Database(ref db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("session {} already exists", new_session.session_id))
                }
                other => StoreError::Database(other),
            })?;
        tx.commit().await?;

        let session = session_from_row(&row)?;
        info!("Session created: {}", session.session_id);
        Ok(session)
    }

    async fn update_last_activity(&self, session_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE collab_sessions SET last_activity = NOW() WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    async fn add_participant(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        color: &str,
    ) -> Result<SessionParticipant, StoreError> {
        self.log_pool("Upserting participant", user_id);
        let mut tx = self.begin().await?;
        let query_sql = format!(
            r#"
            INSERT INTO collab_participants(id, session_id, user_id, display_name, color, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (session_id, user_id) DO UPDATE
                SET is_active = TRUE,
                    display_name = EXCLUDED.display_name,
                    color = EXCLUDED.color,
                    last_active = NOW(),
                    left_at = NULL
            RETURNING {};
            "#,
            PARTICIPANT_COLUMNS
        );
        let row = sqlx::query(&query_sql)
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(user_id)
            .bind(display_name)
            .bind(color)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        participant_from_row(&row)
    }

    async fn get_participants(&self, session_id: &str) -> Result<Vec<SessionParticipant>, StoreError> {
        let query_sql = format!(
            "SELECT {} FROM collab_participants WHERE session_id = $1 AND is_active = TRUE ORDER BY joined_at",
            PARTICIPANT_COLUMNS
        );
        let rows = sqlx::query(&query_sql).bind(session_id).fetch_all(&self.pool).await?;
        rows.iter().map(participant_from_row).collect()
    }

    async fn remove_participant(&self, session_id: &str, user_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE collab_participants
            SET is_active = FALSE, left_at = NOW()
            WHERE session_id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("participant {} in session {}", user_id, session_id)));
        }
        Ok(())
    }

    async fn update_cursor_position(
        &self,
        session_id: &str,
        user_id: &str,
        position: &Value,
        selection: Option<&Value>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE collab_participants
            SET cursor_position = $1, selection = $2, last_active = NOW()
            WHERE session_id = $3 AND user_id = $4
            "#,
        )
        .bind(Json(position))
        .bind(selection.map(Json))
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_presence(&self, session_id: &str, user_id: &str, presence: &PresenceState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE collab_participants
            SET presence = $1, last_active = NOW()
            WHERE session_id = $2 AND user_id = $3
            "#,
        )
        .bind(Json(serde_json::to_value(presence)?))
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_latest_document_version(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        self.log_pool("Loading latest version of", document_id);
        let query_sql = format!(
            r#"
            SELECT {} FROM collab_document_versions
            WHERE document_type = $1 AND document_id = $2
            ORDER BY version DESC
            LIMIT 1
            "#,
            VERSION_COLUMNS
        );
        let row = sqlx::query(&query_sql)
            .bind(document_type)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn get_document_version(
        &self,
        document_type: &str,
        document_id: &str,
        version: i32,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let query_sql = format!(
            r#"
            SELECT {} FROM collab_document_versions
            WHERE document_type = $1 AND document_id = $2 AND version = $3
            "#,
            VERSION_COLUMNS
        );
        let row = sqlx::query(&query_sql)
            .bind(document_type)
            .bind(document_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_document_versions(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> Result<Vec<DocumentVersionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT version, session_id, created_by, created_at, metadata, octet_length(state)::BIGINT AS size
            FROM collab_document_versions
            WHERE document_type = $1 AND document_id = $2
            ORDER BY version DESC
            "#,
        )
        .bind(document_type)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata: Json<Value> = row.try_get("metadata")?;
                Ok(DocumentVersionSummary {
                    version: row.try_get("version")?,
                    session_id: row.try_get("session_id")?,
                    created_by: row.try_get("created_by")?,
                    created_at: row.try_get("created_at")?,
                    size: row.try_get("size")?,
                    metadata: metadata.0,
                })
            })
            .collect()
    }

    async fn save_document_version(&self, version: NewDocumentVersion) -> Result<DocumentVersion, StoreError> {
        self.log_pool("Saving version of", &version.document_id);
        let mut tx = self.begin().await?;
        let query_sql = format!(
            r#"
            INSERT INTO collab_document_versions(id, session_id, document_type, document_id, version, snapshot, state, created_by, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {};
            "#,
            VERSION_COLUMNS
        );
        let row = sqlx::query(&query_sql)
            .bind(Uuid::new_v4())
            .bind(&version.session_id)
            .bind(&version.document_type)
            .bind(&version.document_id)
            .bind(version.version)
            .bind(&version.snapshot)
            .bind(&version.state)
            .bind(&version.created_by)
            .bind(Json(&version.metadata))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                SqlxError::Database(ref db) if db.is_unique_violation() => StoreError::Conflict(format!(
                    "version {} of {}/{} already exists",
                    version.version, version.document_type, version.document_id
                )),
                other => StoreError::Database(other),
            })?;
        tx.commit().await?;

        let saved = version_from_row(&row)?;
        info!(
            "Document version saved: {}/{} v{} ({} bytes)",
            saved.document_type,
            saved.document_id,
            saved.version,
            saved.state.len()
        );
        Ok(saved)
    }

    async fn record_event(&self, event: NewEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO collab_events(id, session_id, user_id, event_type, client_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.session_id)
        .bind(&event.user_id)
        .bind(event.event_type.as_str())
        .bind(&event.client_id)
        .bind(Json(&event.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, session_id: &str, limit: i64) -> Result<Vec<CollaborationEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM collab_events
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn cleanup_inactive_sessions(&self, age_days: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE collab_sessions
            SET status = 'archived'
            WHERE status = 'active'
                AND last_activity < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(age_days as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_old_events(&self, age_days: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM collab_events WHERE created_at < NOW() - make_interval(days => $1)")
            .bind(age_days as i32)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
