//! Postgres implementations of the persistence ports.
//!
//! One table per assigned collection name. Attributes live in a `JSONB`
//! column, expiry in a `TIMESTAMPTZ` filtered on read and purged by the
//! consolidator task, which together emulate collection-level TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use engram_model::{Activity, ActivityId, EntityId, Tier, TierRecord, WarmSummary};

use crate::database::ports::{
    HotTierStore, InsertOutcome, SummaryTierStore, TierStatistics, importance_bucket, time_bucket,
};
use crate::database::{OpTimeouts, bounded};
use crate::error::{EngramError, Result};
use crate::registry::{
    RegisteredService, ServiceRegistration, ServiceRegistry, collection_name_for,
};

/// Collection names are generated internally, but interpolating any
/// identifier into DDL warrants a gate.
fn validate_identifier(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(EngramError::Internal(format!(
            "invalid collection identifier: {name}"
        )))
    }
}

fn activity_table_ddl(table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                activity_id UUID PRIMARY KEY,
                entity_id UUID NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                activity_type TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                is_directory BOOLEAN NOT NULL,
                file_size BIGINT,
                volume TEXT NOT NULL,
                attributes JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                importance_score DOUBLE PRECISION NOT NULL,
                tier TEXT NOT NULL,
                access_count BIGINT NOT NULL DEFAULT 0,
                search_hits BIGINT NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                inserted_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ,
                back_references UUID[] NOT NULL DEFAULT '{{}}',
                summary JSONB
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_expires_idx ON {table} (expires_at)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_entity_idx ON {table} (entity_id)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_timestamp_idx ON {table} (timestamp DESC)"),
    ]
}

const RECORD_COLUMNS: &str = "activity_id, entity_id, timestamp, activity_type, file_path, \
     file_name, is_directory, file_size, volume, attributes, importance_score, tier, \
     access_count, search_hits, version, inserted_at, expires_at, back_references, summary";

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} ({RECORD_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
         ON CONFLICT (activity_id) DO NOTHING"
    )
}

fn record_from_row(row: &PgRow) -> Result<TierRecord> {
    let activity_type: String = row.try_get("activity_type")?;
    let tier: String = row.try_get("tier")?;
    let attributes: serde_json::Value = row.try_get("attributes")?;
    let summary: Option<serde_json::Value> = row.try_get("summary")?;
    let back_references: Vec<Uuid> = row.try_get("back_references")?;
    let file_size: Option<i64> = row.try_get("file_size")?;

    let activity = Activity {
        activity_id: ActivityId(row.try_get("activity_id")?),
        entity_id: EntityId(row.try_get("entity_id")?),
        timestamp: row.try_get("timestamp")?,
        activity_type: activity_type.parse::<engram_model::ActivityType>()?,
        file_path: row.try_get("file_path")?,
        file_name: row.try_get("file_name")?,
        is_directory: row.try_get("is_directory")?,
        file_size: file_size.map(|size| size.max(0) as u64),
        volume: row.try_get("volume")?,
        attributes: serde_json::from_value(attributes)?,
        importance_score: row.try_get("importance_score")?,
        tier: match tier.as_str() {
            "hot" => Tier::Hot,
            "warm" => Tier::Warm,
            "cold" => Tier::Cold,
            other => {
                return Err(EngramError::Internal(format!("unknown tier column: {other}")));
            }
        },
        access_count: row.try_get::<i64, _>("access_count")?.max(0) as u64,
        search_hits: row.try_get::<i64, _>("search_hits")?.max(0) as u64,
    };

    let summary: Option<WarmSummary> = summary.map(serde_json::from_value).transpose()?;

    Ok(TierRecord {
        activity,
        version: row.try_get::<i32, _>("version")?.max(0) as u32,
        inserted_at: row.try_get("inserted_at")?,
        expires_at: row.try_get("expires_at")?,
        back_references: back_references.into_iter().map(ActivityId).collect(),
        summary,
    })
}

async fn insert_record(pool: &PgPool, table: &str, record: &TierRecord) -> Result<InsertOutcome> {
    let attributes = serde_json::to_value(&record.activity.attributes)?;
    let summary = record.summary.as_ref().map(serde_json::to_value).transpose()?;
    let back_references: Vec<Uuid> = record
        .back_references
        .iter()
        .map(|id| id.to_uuid())
        .collect();

    let result = sqlx::query(&insert_sql(table))
        .bind(record.activity.activity_id.to_uuid())
        .bind(record.activity.entity_id.to_uuid())
        .bind(record.activity.timestamp)
        .bind(record.activity.activity_type.as_str())
        .bind(&record.activity.file_path)
        .bind(&record.activity.file_name)
        .bind(record.activity.is_directory)
        .bind(record.activity.file_size.map(|size| size as i64))
        .bind(&record.activity.volume)
        .bind(attributes)
        .bind(record.activity.importance_score)
        .bind(record.activity.tier.as_str())
        .bind(record.activity.access_count as i64)
        .bind(record.activity.search_hits as i64)
        .bind(record.version as i32)
        .bind(record.inserted_at)
        .bind(record.expires_at)
        .bind(back_references)
        .bind(summary)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        Ok(InsertOutcome::Duplicate)
    } else {
        Ok(InsertOutcome::Inserted)
    }
}

async fn expiring_before_in(
    pool: &PgPool,
    table: &str,
    deadline: DateTime<Utc>,
) -> Result<Vec<TierRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM {table} \
         WHERE expires_at IS NOT NULL AND expires_at <= $1 \
         ORDER BY timestamp ASC"
    );
    let rows = sqlx::query(&sql).bind(deadline).fetch_all(pool).await?;
    rows.iter().map(record_from_row).collect()
}

async fn by_entity_in(pool: &PgPool, table: &str, entity_id: &EntityId) -> Result<Vec<TierRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM {table} WHERE entity_id = $1 ORDER BY timestamp ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(entity_id.to_uuid())
        .fetch_all(pool)
        .await?;
    rows.iter().map(record_from_row).collect()
}

async fn delete_in(pool: &PgPool, table: &str, id: &ActivityId) -> Result<bool> {
    let sql = format!("DELETE FROM {table} WHERE activity_id = $1");
    let result = sqlx::query(&sql).bind(id.to_uuid()).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Hot tier store over one assigned collection.
#[derive(Debug, Clone)]
pub struct PostgresHotStore {
    pool: PgPool,
    table: String,
    timeouts: OpTimeouts,
}

impl PostgresHotStore {
    pub fn new(pool: PgPool, table: String, timeouts: OpTimeouts) -> Result<Self> {
        validate_identifier(&table)?;
        Ok(PostgresHotStore {
            pool,
            table,
            timeouts,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in activity_table_ddl(&self.table) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HotTierStore for PostgresHotStore {
    async fn insert(&self, record: &TierRecord) -> Result<InsertOutcome> {
        bounded(
            self.timeouts.short_op,
            "hot insert",
            insert_record(&self.pool, &self.table, record),
        )
        .await
    }

    async fn get_recent(
        &self,
        since: DateTime<Utc>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Activity>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} \
             WHERE timestamp >= $1 AND (expires_at IS NULL OR expires_at > $2) \
             ORDER BY timestamp DESC LIMIT $3",
            self.table
        );
        let rows = bounded(self.timeouts.short_op, "hot get_recent", async {
            sqlx::query(&sql)
                .bind(since)
                .bind(now)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(EngramError::from)
        })
        .await?;
        rows.iter()
            .map(|row| record_from_row(row).map(|record| record.activity))
            .collect()
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<TierStatistics> {
        let sql = format!(
            "SELECT activity_type, importance_score, timestamp FROM {} \
             WHERE expires_at IS NULL OR expires_at > $1",
            self.table
        );
        let rows = bounded(self.timeouts.analytical, "hot statistics", async {
            sqlx::query(&sql).bind(now).fetch_all(&self.pool).await.map_err(EngramError::from)
        })
        .await?;

        let mut stats = TierStatistics::default();
        for row in &rows {
            let activity_type: String = row.try_get("activity_type")?;
            let importance: f64 = row.try_get("importance_score")?;
            let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
            stats.total_count += 1;
            *stats.by_type.entry(activity_type).or_default() += 1;
            *stats
                .by_importance
                .entry(importance_bucket(importance))
                .or_default() += 1;
            *stats
                .by_time
                .entry(time_bucket(timestamp, now).to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn expiring_before(&self, deadline: DateTime<Utc>) -> Result<Vec<TierRecord>> {
        bounded(
            self.timeouts.analytical,
            "hot expiring scan",
            expiring_before_in(&self.pool, &self.table, deadline),
        )
        .await
    }

    async fn by_entity(&self, entity_id: &EntityId) -> Result<Vec<TierRecord>> {
        bounded(
            self.timeouts.short_op,
            "hot by_entity",
            by_entity_in(&self.pool, &self.table, entity_id),
        )
        .await
    }

    async fn delete(&self, id: &ActivityId) -> Result<bool> {
        bounded(
            self.timeouts.short_op,
            "hot delete",
            delete_in(&self.pool, &self.table, id),
        )
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at <= $1", self.table);
        let result = bounded(self.timeouts.analytical, "hot purge", async {
            sqlx::query(&sql).bind(now).execute(&self.pool).await.map_err(EngramError::from)
        })
        .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS live FROM {} WHERE expires_at IS NULL OR expires_at > $1",
            self.table
        );
        let row = bounded(self.timeouts.short_op, "hot count", async {
            sqlx::query(&sql).bind(now).fetch_one(&self.pool).await.map_err(EngramError::from)
        })
        .await?;
        Ok(row.try_get::<i64, _>("live")?.max(0) as u64)
    }
}

/// Warm and cold stores derived from the hot collection's name.
#[derive(Debug, Clone)]
pub struct PostgresSummaryStore {
    pool: PgPool,
    warm_table: String,
    cold_table: String,
    timeouts: OpTimeouts,
}

impl PostgresSummaryStore {
    pub fn new(
        pool: PgPool,
        warm_table: String,
        cold_table: String,
        timeouts: OpTimeouts,
    ) -> Result<Self> {
        validate_identifier(&warm_table)?;
        validate_identifier(&cold_table)?;
        Ok(PostgresSummaryStore {
            pool,
            warm_table,
            cold_table,
            timeouts,
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for table in [&self.warm_table, &self.cold_table] {
            for statement in activity_table_ddl(table) {
                sqlx::query(&statement).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    fn table(&self, tier: Tier) -> Result<&str> {
        match tier {
            Tier::Warm => Ok(&self.warm_table),
            Tier::Cold => Ok(&self.cold_table),
            Tier::Hot => Err(EngramError::Internal(
                "hot tier is not a summary collection".into(),
            )),
        }
    }
}

#[async_trait]
impl SummaryTierStore for PostgresSummaryStore {
    async fn insert(&self, tier: Tier, record: &TierRecord) -> Result<InsertOutcome> {
        let table = self.table(tier)?;
        bounded(
            self.timeouts.short_op,
            "summary insert",
            insert_record(&self.pool, table, record),
        )
        .await
    }

    async fn expiring_before(&self, tier: Tier, deadline: DateTime<Utc>) -> Result<Vec<TierRecord>> {
        let table = self.table(tier)?;
        bounded(
            self.timeouts.analytical,
            "summary expiring scan",
            expiring_before_in(&self.pool, table, deadline),
        )
        .await
    }

    async fn by_entity(&self, tier: Tier, entity_id: &EntityId) -> Result<Vec<TierRecord>> {
        let table = self.table(tier)?;
        bounded(
            self.timeouts.short_op,
            "summary by_entity",
            by_entity_in(&self.pool, table, entity_id),
        )
        .await
    }

    async fn delete(&self, tier: Tier, id: &ActivityId) -> Result<bool> {
        let table = self.table(tier)?;
        bounded(
            self.timeouts.short_op,
            "summary delete",
            delete_in(&self.pool, table, id),
        )
        .await
    }

    async fn purge_expired(&self, tier: Tier, now: DateTime<Utc>) -> Result<u64> {
        let table = self.table(tier)?;
        let sql = format!("DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= $1");
        let result = bounded(self.timeouts.analytical, "summary purge", async {
            sqlx::query(&sql).bind(now).execute(&self.pool).await.map_err(EngramError::from)
        })
        .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, tier: Tier) -> Result<u64> {
        let table = self.table(tier)?;
        let sql = format!("SELECT COUNT(*) AS total FROM {table}");
        let row = bounded(self.timeouts.short_op, "summary count", async {
            sqlx::query(&sql).fetch_one(&self.pool).await.map_err(EngramError::from)
        })
        .await?;
        Ok(row.try_get::<i64, _>("total")?.max(0) as u64)
    }
}

/// Registry table: one row per registered service, collection name
/// assigned on first registration and returned verbatim afterwards.
#[derive(Debug, Clone)]
pub struct PostgresServiceRegistry {
    pool: PgPool,
    timeouts: OpTimeouts,
}

impl PostgresServiceRegistry {
    pub fn new(pool: PgPool, timeouts: OpTimeouts) -> Self {
        PostgresServiceRegistry { pool, timeouts }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS service_registry (
                service_uuid UUID PRIMARY KEY,
                service_name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT NOT NULL,
                service_type TEXT NOT NULL,
                collection_name TEXT NOT NULL UNIQUE,
                registered_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for PostgresServiceRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<RegisteredService> {
        let assigned = collection_name_for(&registration.service_id);
        let row = bounded(self.timeouts.short_op, "service registration", async {
            sqlx::query(
                "INSERT INTO service_registry \
                 (service_uuid, service_name, version, description, service_type, collection_name) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (service_uuid) DO UPDATE SET version = EXCLUDED.version \
                 RETURNING collection_name",
            )
            .bind(registration.service_id.as_uuid())
            .bind(&registration.name)
            .bind(&registration.version)
            .bind(&registration.description)
            .bind(&registration.service_type)
            .bind(&assigned)
            .fetch_one(&self.pool)
            .await
            .map_err(EngramError::from)
        })
        .await?;

        Ok(RegisteredService {
            collection_name: row.try_get("collection_name")?,
        })
    }
}
