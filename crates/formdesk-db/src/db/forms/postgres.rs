use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use formdesk_core::models::{
    ActivityEvent, AnalyticsCounter, DailyFormAnalytics, FormFilter, FormRecord,
};
use formdesk_core::AppError;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::store::{ChangeFeed, FormChange, FormCounter, FormStore};

/// Channel the `forms_changed` trigger notifies on.
pub const FORMS_CHANGED_CHANNEL: &str = "formdesk_forms_changed";

const FORM_COLUMNS: &str = "id, title, description, form_number, category, line_of_business, \
     tags, state_applicability, edition_date, effective_date, expiration_date, version, \
     is_active, is_deleted, deleted_at, deleted_by, file_url, file_size, created_by, \
     modified_by, created_at, updated_at, view_count, download_count, search_keywords";

/// Row shape of the `forms` table. Enum columns are stored as text.
#[derive(Debug, sqlx::FromRow)]
struct FormRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    form_number: String,
    category: String,
    line_of_business: String,
    tags: Vec<String>,
    state_applicability: Vec<String>,
    edition_date: NaiveDate,
    effective_date: NaiveDate,
    expiration_date: Option<NaiveDate>,
    version: String,
    is_active: bool,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
    file_url: Option<String>,
    file_size: Option<i64>,
    created_by: String,
    modified_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    view_count: i64,
    download_count: i64,
    search_keywords: Vec<String>,
}

impl TryFrom<FormRow> for FormRecord {
    type Error = AppError;

    fn try_from(row: FormRow) -> Result<Self, Self::Error> {
        Ok(FormRecord {
            id: row.id,
            title: row.title,
            description: row.description,
            form_number: row.form_number,
            category: row.category.parse().map_err(AppError::Persistence)?,
            line_of_business: row.line_of_business.parse().map_err(AppError::Persistence)?,
            tags: row.tags,
            state_applicability: row.state_applicability,
            edition_date: row.edition_date,
            effective_date: row.effective_date,
            expiration_date: row.expiration_date,
            version: row.version,
            is_active: row.is_active,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
            file_url: row.file_url,
            file_size: row.file_size,
            created_by: row.created_by,
            modified_by: row.modified_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            view_count: row.view_count,
            download_count: row.download_count,
            search_keywords: row.search_keywords.into_iter().collect(),
        })
    }
}

fn into_records(rows: Vec<FormRow>) -> Result<Vec<FormRecord>, AppError> {
    rows.into_iter().map(FormRecord::try_from).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    user_id: String,
    action: String,
    form_id: Option<Uuid>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AnalyticsRow {
    form_id: Uuid,
    date: NaiveDate,
    views: i64,
    downloads: i64,
    searches: i64,
    unique_users: Vec<String>,
}

/// PostgreSQL implementation of [`FormStore`]
#[derive(Clone)]
pub struct PostgresFormStore {
    pool: PgPool,
}

impl PostgresFormStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Migration failed: {}", e)))
    }
}

#[async_trait::async_trait]
impl FormStore for PostgresFormStore {
    #[tracing::instrument(skip(self, record), fields(db.table = "forms", db.operation = "insert"))]
    async fn insert_form(&self, record: FormRecord) -> Result<Uuid, AppError> {
        let keywords: Vec<String> = record.search_keywords.iter().cloned().collect();
        let id = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            INSERT INTO forms (
                title, description, form_number, category, line_of_business, tags,
                state_applicability, edition_date, effective_date, expiration_date, version,
                is_active, is_deleted, deleted_at, deleted_by, file_url, file_size,
                created_by, modified_by, created_at, updated_at, view_count, download_count,
                search_keywords
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24)
            RETURNING id
            "#,
        )
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.form_number)
        .bind(record.category.as_str())
        .bind(record.line_of_business.as_str())
        .bind(&record.tags)
        .bind(&record.state_applicability)
        .bind(record.edition_date)
        .bind(record.effective_date)
        .bind(record.expiration_date)
        .bind(&record.version)
        .bind(record.is_active)
        .bind(record.is_deleted)
        .bind(record.deleted_at)
        .bind(&record.deleted_by)
        .bind(&record.file_url)
        .bind(record.file_size)
        .bind(&record.created_by)
        .bind(&record.modified_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.view_count)
        .bind(record.download_count)
        .bind(&keywords)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, form_number = %record.form_number, "Failed to insert form");
            AppError::from(e)
        })?;

        Ok(id)
    }

    #[tracing::instrument(skip(self), fields(db.table = "forms", db.operation = "select", db.record_id = %id))]
    async fn get_form(&self, id: Uuid) -> Result<Option<FormRecord>, AppError> {
        let row = sqlx::query_as::<Postgres, FormRow>(&format!(
            "SELECT {} FROM forms WHERE id = $1",
            FORM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FormRecord::try_from).transpose()
    }

    #[tracing::instrument(skip(self, record), fields(db.table = "forms", db.operation = "update", db.record_id = %record.id))]
    async fn replace_form(&self, record: &FormRecord) -> Result<(), AppError> {
        let keywords: Vec<String> = record.search_keywords.iter().cloned().collect();
        let result = sqlx::query(
            r#"
            UPDATE forms SET
                title = $2, description = $3, form_number = $4, category = $5,
                line_of_business = $6, tags = $7, state_applicability = $8, edition_date = $9,
                effective_date = $10, expiration_date = $11, version = $12, is_active = $13,
                is_deleted = $14, deleted_at = $15, deleted_by = $16, file_url = $17,
                file_size = $18, modified_by = $19, updated_at = $20, search_keywords = $21
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.form_number)
        .bind(record.category.as_str())
        .bind(record.line_of_business.as_str())
        .bind(&record.tags)
        .bind(&record.state_applicability)
        .bind(record.edition_date)
        .bind(record.effective_date)
        .bind(record.expiration_date)
        .bind(&record.version)
        .bind(record.is_active)
        .bind(record.is_deleted)
        .bind(record.deleted_at)
        .bind(&record.deleted_by)
        .bind(&record.file_url)
        .bind(record.file_size)
        .bind(&record.modified_by)
        .bind(record.updated_at)
        .bind(&keywords)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Form {}", record.id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "forms", db.operation = "select_list"))]
    async fn list_forms(
        &self,
        filter: &FormFilter,
        limit: usize,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<FormRecord>, AppError> {
        let mut sql = format!("SELECT {} FROM forms WHERE is_deleted = FALSE", FORM_COLUMNS);
        let mut param_count = 1;

        if filter.category.is_some() {
            sql.push_str(&format!(" AND category = ${}", param_count));
            param_count += 1;
        }
        if filter.line_of_business.is_some() {
            sql.push_str(&format!(" AND line_of_business = ${}", param_count));
            param_count += 1;
        }
        if filter.is_active.is_some() {
            sql.push_str(&format!(" AND is_active = ${}", param_count));
            param_count += 1;
        }
        if !filter.states.is_empty() {
            sql.push_str(&format!(" AND state_applicability && ${}::text[]", param_count));
            param_count += 1;
        }
        if after.is_some() {
            sql.push_str(&format!(
                " AND (updated_at, id) < (${}, ${})",
                param_count,
                param_count + 1
            ));
            param_count += 2;
        }
        sql.push_str(&format!(
            " ORDER BY updated_at DESC, id DESC LIMIT ${}",
            param_count
        ));

        // Bind parameters in the same order they were added
        let mut query = sqlx::query_as::<Postgres, FormRow>(&sql);
        if let Some(category) = filter.category {
            query = query.bind(category.as_str());
        }
        if let Some(lob) = filter.line_of_business {
            query = query.bind(lob.as_str());
        }
        if let Some(active) = filter.is_active {
            query = query.bind(active);
        }
        if !filter.states.is_empty() {
            query = query.bind(filter.states.iter().cloned().collect::<Vec<String>>());
        }
        if let Some((updated_at, id)) = after {
            query = query.bind(updated_at).bind(id);
        }
        query = query.bind(limit as i64);

        into_records(query.fetch_all(&self.pool).await?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "forms", db.operation = "search"))]
    async fn search_forms(
        &self,
        tokens: &BTreeSet<String>,
        narrowing: &FormFilter,
        limit: usize,
    ) -> Result<Vec<FormRecord>, AppError> {
        let mut sql = format!(
            "SELECT {} FROM forms WHERE is_deleted = FALSE AND search_keywords && $1::text[]",
            FORM_COLUMNS
        );
        let mut param_count = 2;

        if narrowing.category.is_some() {
            sql.push_str(&format!(" AND category = ${}", param_count));
            param_count += 1;
        }
        if narrowing.is_active.is_some() {
            sql.push_str(&format!(" AND is_active = ${}", param_count));
            param_count += 1;
        }
        sql.push_str(&format!(
            " ORDER BY updated_at DESC, id DESC LIMIT ${}",
            param_count
        ));

        let mut query = sqlx::query_as::<Postgres, FormRow>(&sql)
            .bind(tokens.iter().cloned().collect::<Vec<String>>());
        if let Some(category) = narrowing.category {
            query = query.bind(category.as_str());
        }
        if let Some(active) = narrowing.is_active {
            query = query.bind(active);
        }
        query = query.bind(limit as i64);

        into_records(query.fetch_all(&self.pool).await?)
    }

    #[tracing::instrument(skip(self), fields(db.table = "forms", db.operation = "scan"))]
    async fn scan_forms(&self) -> Result<Vec<FormRecord>, AppError> {
        let rows = sqlx::query_as::<Postgres, FormRow>(&format!(
            "SELECT {} FROM forms WHERE is_deleted = FALSE",
            FORM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    #[tracing::instrument(skip(self), fields(db.table = "forms", db.operation = "increment", db.record_id = %id))]
    async fn increment_counter(&self, id: Uuid, counter: FormCounter) -> Result<(), AppError> {
        let sql = match counter {
            FormCounter::Views => "UPDATE forms SET view_count = view_count + 1 WHERE id = $1",
            FormCounter::Downloads => {
                "UPDATE forms SET download_count = download_count + 1 WHERE id = $1"
            }
        };
        let result = sqlx::query(sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Form {}", id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, event), fields(db.table = "user_activity", db.operation = "insert"))]
    async fn record_activity(&self, event: &ActivityEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_activity (user_id, action, form_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&event.user_id)
        .bind(event.action.as_str())
        .bind(event.form_id)
        .bind(&event.metadata)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "user_activity", db.operation = "select_list"))]
    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, AppError> {
        let rows = sqlx::query_as::<Postgres, ActivityRow>(
            r#"
            SELECT user_id, action, form_id, metadata, created_at
            FROM user_activity
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ActivityEvent {
                    user_id: row.user_id,
                    action: row.action.parse().map_err(AppError::Persistence)?,
                    form_id: row.form_id,
                    metadata: row.metadata,
                    timestamp: row.created_at,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self), fields(db.table = "form_analytics", db.operation = "upsert", db.record_id = %form_id))]
    async fn bump_daily_analytics(
        &self,
        form_id: Uuid,
        date: NaiveDate,
        counter: AnalyticsCounter,
        user_id: &str,
    ) -> Result<(), AppError> {
        let (views, downloads, searches): (i64, i64, i64) = match counter {
            AnalyticsCounter::Views => (1, 0, 0),
            AnalyticsCounter::Downloads => (0, 1, 0),
            AnalyticsCounter::Searches => (0, 0, 1),
        };

        sqlx::query(
            r#"
            INSERT INTO form_analytics (id, form_id, date, views, downloads, searches, unique_users)
            VALUES ($1, $2, $3, $4, $5, $6, ARRAY[$7]::text[])
            ON CONFLICT (id) DO UPDATE SET
                views = form_analytics.views + EXCLUDED.views,
                downloads = form_analytics.downloads + EXCLUDED.downloads,
                searches = form_analytics.searches + EXCLUDED.searches,
                unique_users = CASE
                    WHEN $7 = ANY(form_analytics.unique_users) THEN form_analytics.unique_users
                    ELSE array_append(form_analytics.unique_users, $7)
                END,
                updated_at = NOW()
            "#,
        )
        .bind(DailyFormAnalytics::document_id(form_id, date))
        .bind(form_id)
        .bind(date)
        .bind(views)
        .bind(downloads)
        .bind(searches)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "form_analytics", db.operation = "select", db.record_id = %form_id))]
    async fn get_daily_analytics(
        &self,
        form_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyFormAnalytics>, AppError> {
        let row = sqlx::query_as::<Postgres, AnalyticsRow>(
            r#"
            SELECT form_id, date, views, downloads, searches, unique_users
            FROM form_analytics
            WHERE id = $1
            "#,
        )
        .bind(DailyFormAnalytics::document_id(form_id, date))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DailyFormAnalytics {
            form_id: row.form_id,
            date: row.date,
            views: row.views,
            downloads: row.downloads,
            searches: row.searches,
            unique_users: row.unique_users.into_iter().collect(),
        }))
    }

    async fn watch_changes(&self) -> Result<ChangeFeed, AppError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(FORMS_CHANGED_CHANNEL).await?;

        let feed = futures::stream::unfold(listener, |mut listener| async move {
            match listener.recv().await {
                Ok(notification) => {
                    let form_id = notification.payload().parse::<Uuid>().ok();
                    Some((FormChange { form_id }, listener))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Forms change listener stopped");
                    None
                }
            }
        });
        Ok(Box::pin(feed))
    }
}
