//! Postgres implementation of every issnl_core store port.
//!
//! All SQL is runtime-checked (sqlx::query, not sqlx::query!) so the crate
//! builds without a live database. Bulk writes go through UNNEST arrays in
//! fixed-size chunks.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, info};

use issnl_core::enrichment::EnrichmentUpdate;
use issnl_core::error::IdentityError;
use issnl_core::mutators::{MergePlan, MovePlan};
use issnl_core::ports::*;
use issnl_core::types::*;

/// Rows per UNNEST statement.
const CHUNK_SIZE: usize = 10_000;

/// Session advisory lock key for reconciliation runs ("issnl" + 1).
const RUN_LOCK_KEY: i64 = 0x6973_736e_6c00_0001;

fn parse_issn(raw: &str) -> Result<Issn> {
    Issn::parse(raw).map_err(|e| IdentityError::Internal(anyhow!("corrupt identifier in store: {e}")))
}

fn split_pairs(pairs: &[MappingPair]) -> (Vec<String>, Vec<String>) {
    pairs
        .iter()
        .map(|p| (p.identifier.to_string(), p.linking_identifier.to_string()))
        .unzip()
}

fn issn_strings(ids: &[Issn]) -> Vec<String> {
    ids.iter().map(Issn::to_string).collect()
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    issn_l: String,
    issn_org_issns: Json<Vec<Issn>>,
    crossref_issns: Json<Vec<Issn>>,
    previous_issn_ls: Json<Vec<Issn>>,
    issn_org_raw_api: Option<serde_json::Value>,
    crossref_raw_api: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<MetadataRow> for CanonicalMetadata {
    type Error = IdentityError;

    fn try_from(row: MetadataRow) -> Result<Self> {
        Ok(Self {
            linking_identifier: parse_issn(&row.issn_l)?,
            registry_aliases: row.issn_org_issns.0,
            crossref_aliases: row.crossref_issns.0,
            previously_known_as: row.previous_issn_ls.0,
            registry_payload: row.issn_org_raw_api,
            crossref_payload: row.crossref_raw_api,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const METADATA_COLUMNS: &str = "issn_l, issn_org_issns, crossref_issns, previous_issn_ls, \
                                issn_org_raw_api, crossref_raw_api, created_at, updated_at";

type MappingRow = (String, String, bool, DateTime<Utc>);

fn mapping_from_row((issn, issn_l, is_active, created_at): MappingRow) -> Result<CanonicalMapping> {
    Ok(CanonicalMapping {
        identifier: parse_issn(&issn)?,
        linking_identifier: parse_issn(&issn_l)?,
        is_active,
        created_at,
    })
}

// ── PgIdentityStore ──────────────────────────────────────────

/// Postgres-backed identity graph.
pub struct PgIdentityStore {
    pool: PgPool,
    /// Connection holding the session advisory lock while a run is active.
    run_lock: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            run_lock: Mutex::new(None),
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        info!(
            "Connecting to database: {}",
            crate::mask_database_url(database_url)
        );
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn fetch_metadata<'e, E>(executor: E, linking_identifier: Issn) -> Result<Option<CanonicalMetadata>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM issn_metadata WHERE issn_l = $1"
        ))
        .bind(linking_identifier.as_str())
        .fetch_optional(executor)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(CanonicalMetadata::try_from).transpose()
    }
}

// ── MappingStore ─────────────────────────────────────────────

#[async_trait]
impl MappingStore for PgIdentityStore {
    async fn active_mappings(&self) -> Result<Vec<CanonicalMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT issn, issn_l, is_active, created_at
            FROM issn_to_issnl
            WHERE is_active
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(mapping_from_row).collect()
    }

    async fn mapping_for(&self, identifier: Issn) -> Result<Option<CanonicalMapping>> {
        let row = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT issn, issn_l, is_active, created_at
            FROM issn_to_issnl
            WHERE issn = $1 AND is_active
            "#,
        )
        .bind(identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(mapping_from_row).transpose()
    }

    async fn mappings_for_linking(
        &self,
        linking_identifier: Issn,
    ) -> Result<Vec<CanonicalMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT issn, issn_l, is_active, created_at
            FROM issn_to_issnl
            WHERE issn_l = $1 AND is_active
            ORDER BY created_at, issn
            "#,
        )
        .bind(linking_identifier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(mapping_from_row).collect()
    }

    async fn insert_mappings(&self, pairs: &[MappingPair]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let mut inserted = 0u64;

        for chunk in pairs.chunks(CHUNK_SIZE) {
            let (issns, issn_ls) = split_pairs(chunk);
            let rows = sqlx::query_as::<_, (String, String)>(
                r#"
                INSERT INTO issn_to_issnl (issn, issn_l, is_active)
                SELECT u.issn, u.issn_l, TRUE
                FROM UNNEST($1::text[], $2::text[]) AS u(issn, issn_l)
                ON CONFLICT (issn) DO NOTHING
                RETURNING issn, issn_l
                "#,
            )
            .bind(&issns)
            .bind(&issn_ls)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;

            if rows.is_empty() {
                continue;
            }
            inserted += rows.len() as u64;
            let (new_issns, new_issn_ls): (Vec<String>, Vec<String>) = rows.into_iter().unzip();

            sqlx::query(
                r#"
                INSERT INTO issn_history (issn_l, issn, status)
                SELECT u.issn_l, u.issn, 'added'
                FROM UNNEST($1::text[], $2::text[]) AS u(issn, issn_l)
                ON CONFLICT (issn_l, issn, status) DO NOTHING
                "#,
            )
            .bind(&new_issns)
            .bind(&new_issn_ls)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        debug!(inserted, "canonical mappings inserted");
        Ok(inserted)
    }

    async fn record_removals(&self, pairs: &[MappingPair]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let mut appended = 0u64;

        for chunk in pairs.chunks(CHUNK_SIZE) {
            let (issns, issn_ls) = split_pairs(chunk);
            let result = sqlx::query(
                r#"
                INSERT INTO issn_history (issn_l, issn, status)
                SELECT u.issn_l, u.issn, 'removed'
                FROM UNNEST($1::text[], $2::text[]) AS u(issn, issn_l)
                ON CONFLICT (issn_l, issn, status) DO NOTHING
                "#,
            )
            .bind(&issns)
            .bind(&issn_ls)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
            appended += result.rows_affected();
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(appended)
    }

    async fn history_for(&self, identifier: Issn) -> Result<Vec<MappingHistory>> {
        let rows = sqlx::query_as::<_, (String, String, String, DateTime<Utc>)>(
            r#"
            SELECT issn_l, issn, status, occurred_at
            FROM issn_history
            WHERE issn = $1
            ORDER BY occurred_at, id
            "#,
        )
        .bind(identifier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        rows.into_iter()
            .map(|(issn_l, issn, status, occurred_at)| {
                let status = HistoryStatus::parse(&status).ok_or_else(|| {
                    IdentityError::Internal(anyhow!("unknown history status {status:?}"))
                })?;
                Ok(MappingHistory {
                    linking_identifier: parse_issn(&issn_l)?,
                    identifier: parse_issn(&issn)?,
                    status,
                    occurred_at,
                })
            })
            .collect()
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let (mappings, history, metadata) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                (SELECT count(*) FROM issn_to_issnl),
                (SELECT count(*) FROM issn_history),
                (SELECT count(*) FROM issn_metadata)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(GraphCounts {
            mappings: mappings as u64,
            history: history as u64,
            metadata: metadata as u64,
        })
    }
}

// ── MetadataStore ────────────────────────────────────────────

#[async_trait]
impl MetadataStore for PgIdentityStore {
    async fn upsert_registry_aliases(&self, groups: &[(Issn, Vec<Issn>)]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let mut written = 0u64;

        for chunk in groups.chunks(CHUNK_SIZE) {
            let issn_ls: Vec<String> = chunk.iter().map(|(l, _)| l.to_string()).collect();
            let aliases: Vec<serde_json::Value> = chunk
                .iter()
                .map(|(_, members)| serde_json::to_value(members))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| anyhow!(e))?;

            // Only the alias list is replaced; enrichment columns survive.
            let result = sqlx::query(
                r#"
                INSERT INTO issn_metadata (issn_l, issn_org_issns)
                SELECT u.issn_l, u.aliases
                FROM UNNEST($1::text[], $2::jsonb[]) AS u(issn_l, aliases)
                ON CONFLICT (issn_l) DO UPDATE
                SET issn_org_issns = EXCLUDED.issn_org_issns
                "#,
            )
            .bind(&issn_ls)
            .bind(&aliases)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(written)
    }

    async fn metadata(&self, linking_identifier: Issn) -> Result<Option<CanonicalMetadata>> {
        Self::fetch_metadata(&self.pool, linking_identifier).await
    }

    async fn find_by_registry_alias(
        &self,
        identifier: Issn,
    ) -> Result<Option<CanonicalMetadata>> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            r#"
            SELECT {METADATA_COLUMNS}
            FROM issn_metadata
            WHERE issn_org_issns @> jsonb_build_array($1::text)
            ORDER BY issn_l
            LIMIT 1
            "#
        ))
        .bind(identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(CanonicalMetadata::try_from).transpose()
    }

    async fn find_by_crossref_alias(&self, identifier: Issn) -> Result<Vec<CanonicalMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            r#"
            SELECT {METADATA_COLUMNS}
            FROM issn_metadata
            WHERE crossref_issns @> jsonb_build_array($1::text)
            ORDER BY issn_l
            "#
        ))
        .bind(identifier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(CanonicalMetadata::try_from).collect()
    }

    async fn pending_enrichment(&self, limit: usize) -> Result<Vec<CanonicalMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            r#"
            SELECT {METADATA_COLUMNS}
            FROM issn_metadata
            WHERE updated_at IS NULL
            ORDER BY issn_l
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(CanonicalMetadata::try_from).collect()
    }

    async fn save_enrichment(&self, update: &EnrichmentUpdate) -> Result<()> {
        let crossref_aliases = update
            .crossref_aliases
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| anyhow!(e))?;

        let result = sqlx::query(
            r#"
            UPDATE issn_metadata
            SET issn_org_raw_api = COALESCE($2::jsonb, issn_org_raw_api),
                crossref_raw_api = COALESCE($3::jsonb, crossref_raw_api),
                crossref_issns   = COALESCE($4::jsonb, crossref_issns),
                updated_at       = $5
            WHERE issn_l = $1
            "#,
        )
        .bind(update.linking_identifier.as_str())
        .bind(&update.registry_payload)
        .bind(&update.crossref_payload)
        .bind(&crossref_aliases)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(format!(
                "metadata {}",
                update.linking_identifier
            )));
        }
        Ok(())
    }

    async fn record_linked_identity(&self, link: &LinkedIdentity) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO linked_issn_l (issn_l_primary, issn_l_secondary, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (issn_l_primary, issn_l_secondary) DO NOTHING
            "#,
        )
        .bind(link.primary.as_str())
        .bind(link.secondary.as_str())
        .bind(&link.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn linked_identities(&self, linking_identifier: Issn) -> Result<Vec<LinkedIdentity>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT issn_l_primary, issn_l_secondary, reason
            FROM linked_issn_l
            WHERE issn_l_primary = $1 OR issn_l_secondary = $1
            ORDER BY id
            "#,
        )
        .bind(linking_identifier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|(primary, secondary, reason)| {
                Ok(LinkedIdentity {
                    primary: parse_issn(&primary)?,
                    secondary: parse_issn(&secondary)?,
                    reason,
                })
            })
            .collect()
    }

    async fn retain_metadata(&self, keep: &HashSet<Issn>) -> Result<u64> {
        let keep: Vec<String> = keep.iter().map(Issn::to_string).collect();
        let result = sqlx::query(
            r#"
            DELETE FROM issn_metadata
            WHERE NOT (issn_l = ANY($1::text[]))
            "#,
        )
        .bind(&keep)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }
}

// ── JournalStore ─────────────────────────────────────────────

type JournalRow = (String, String, Option<String>, Json<Vec<String>>, bool);

fn journal_from_row((issn_l, title, publisher, other_titles, is_modified_title): JournalRow) -> Result<Journal> {
    Ok(Journal {
        linking_identifier: parse_issn(&issn_l)?,
        title,
        publisher,
        alternate_titles: other_titles.0,
        is_modified_title,
    })
}

#[async_trait]
impl JournalStore for PgIdentityStore {
    async fn journal(&self, linking_identifier: Issn) -> Result<Option<Journal>> {
        let row = sqlx::query_as::<_, JournalRow>(
            r#"
            SELECT issn_l, title, publisher, other_titles, is_modified_title
            FROM journals
            WHERE issn_l = $1
            "#,
        )
        .bind(linking_identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(journal_from_row).transpose()
    }

    async fn upsert_journal(&self, journal: &Journal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO journals (issn_l, title, publisher, other_titles, is_modified_title)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (issn_l) DO UPDATE
            SET title = EXCLUDED.title,
                publisher = EXCLUDED.publisher,
                other_titles = EXCLUDED.other_titles,
                is_modified_title = EXCLUDED.is_modified_title,
                updated_at = now()
            "#,
        )
        .bind(journal.linking_identifier.as_str())
        .bind(&journal.title)
        .bind(&journal.publisher)
        .bind(Json(&journal.alternate_titles))
        .bind(journal.is_modified_title)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn priced_record_count(&self, linking_identifier: Issn) -> Result<u64> {
        priced_record_count(&self.pool, linking_identifier).await
    }
}

async fn priced_record_count<'e, E>(executor: E, linking_identifier: Issn) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT (SELECT count(*) FROM subscription_prices WHERE issn_l = $1)
             + (SELECT count(*) FROM apc_prices WHERE issn_l = $1)
        "#,
    )
    .bind(linking_identifier.as_str())
    .fetch_one(executor)
    .await
    .map_err(|e| anyhow!(e))?;
    Ok(count as u64)
}

// ── PendingRequestStore ──────────────────────────────────────

#[async_trait]
impl PendingRequestStore for PgIdentityStore {
    async fn unprocessed_requests(&self) -> Result<Vec<PendingIdentifierRequest>> {
        let rows = sqlx::query_as::<_, (i64, String, String, bool)>(
            r#"
            SELECT id, issn, status, processed
            FROM missing_journals
            WHERE status = $1 AND NOT processed
            ORDER BY id
            "#,
        )
        .bind(PENDING_STATUS_PROCESS)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows
            .into_iter()
            .map(|(id, identifier, status, processed)| PendingIdentifierRequest {
                id,
                identifier,
                status,
                processed,
            })
            .collect())
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE missing_journals
            SET processed = TRUE
            WHERE id = ANY($1::bigint[]) AND NOT processed
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }
}

// ── IdentityGraphStore ───────────────────────────────────────

const APPEND_ALIAS_SQL: &str = r#"
    UPDATE issn_metadata
    SET issn_org_issns = issn_org_issns || jsonb_build_array($2::text)
    WHERE issn_l = $1
      AND NOT issn_org_issns @> jsonb_build_array($2::text)
"#;

#[async_trait]
impl IdentityGraphStore for PgIdentityStore {
    async fn apply_merge(&self, plan: &MergePlan) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        // Lock the doomed journal, then re-check the guard under the lock.
        sqlx::query("SELECT 1 FROM journals WHERE issn_l = $1 FOR UPDATE")
            .bind(plan.from.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        let priced_records = priced_record_count(&mut *tx, plan.from).await?;
        if priced_records > 0 {
            return Err(IdentityError::MergeBlocked {
                linking_identifier: plan.from,
                priced_records,
            });
        }

        let target = sqlx::query_as::<_, (Json<Vec<Issn>>, Json<Vec<Issn>>)>(
            r#"
            SELECT issn_org_issns, previous_issn_ls
            FROM issn_metadata
            WHERE issn_l = $1
            FOR UPDATE
            "#,
        )
        .bind(plan.to.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| IdentityError::NotFound(format!("metadata {}", plan.to)))?;
        let other_titles = sqlx::query_scalar::<_, Json<Vec<String>>>(
            "SELECT other_titles FROM journals WHERE issn_l = $1 FOR UPDATE",
        )
        .bind(plan.to.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| IdentityError::NotFound(format!("journal {}", plan.to)))?;

        for table in ["journals", "issn_metadata", "issn_to_issnl"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE issn_l = $1"))
                .bind(plan.from.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
        }

        let repointed = issn_strings(&plan.repointed);
        sqlx::query(
            r#"
            INSERT INTO issn_to_issnl (issn, issn_l, is_active)
            SELECT u.issn, $2, TRUE
            FROM UNNEST($1::text[]) AS u(issn)
            ON CONFLICT (issn) DO NOTHING
            "#,
        )
        .bind(&repointed)
        .bind(plan.to.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        let (Json(mut aliases), Json(mut previous)) = target;
        for alias in &plan.moved_aliases {
            if !aliases.contains(alias) {
                aliases.push(*alias);
            }
        }
        if !previous.contains(&plan.from) {
            previous.push(plan.from);
        }
        sqlx::query(
            r#"
            UPDATE issn_metadata
            SET issn_org_issns = $2, previous_issn_ls = $3
            WHERE issn_l = $1
            "#,
        )
        .bind(plan.to.as_str())
        .bind(Json(&aliases))
        .bind(Json(&previous))
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        if let Some(title) = &plan.alternate_title {
            let Json(mut titles) = other_titles;
            if !titles.contains(title) {
                titles.push(title.clone());
                sqlx::query(
                    "UPDATE journals SET other_titles = $2, updated_at = now() WHERE issn_l = $1",
                )
                .bind(plan.to.as_str())
                .bind(Json(&titles))
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
            }
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn apply_move(&self, plan: &MovePlan) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let target_exists = sqlx::query("SELECT 1 FROM issn_metadata WHERE issn_l = $1 FOR UPDATE")
            .bind(plan.to.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?
            .is_some();
        if !target_exists {
            return Err(IdentityError::NotFound(format!("metadata {}", plan.to)));
        }

        if let Some(retired) = plan.retired_linking {
            for table in ["journals", "issn_metadata", "issn_to_issnl"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE issn_l = $1"))
                    .bind(retired.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| anyhow!(e))?;
            }
        }

        let (issns, issn_ls) = split_pairs(&plan.deleted_mappings);
        sqlx::query(
            r#"
            DELETE FROM issn_to_issnl t
            USING UNNEST($1::text[], $2::text[]) AS u(issn, issn_l)
            WHERE t.issn = u.issn AND t.issn_l = u.issn_l
            "#,
        )
        .bind(&issns)
        .bind(&issn_ls)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        sqlx::query("DELETE FROM issn_to_issnl WHERE issn = $1")
            .bind(plan.identifier.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        sqlx::query("INSERT INTO issn_to_issnl (issn, issn_l, is_active) VALUES ($1, $2, TRUE)")
            .bind(plan.identifier.as_str())
            .bind(plan.to.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        sqlx::query(APPEND_ALIAS_SQL)
            .bind(plan.to.as_str())
            .bind(plan.identifier.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn graft(&self, pair: MappingPair) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO issn_to_issnl (issn, issn_l, is_active)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (issn) DO NOTHING
            "#,
        )
        .bind(pair.identifier.as_str())
        .bind(pair.linking_identifier.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query(APPEND_ALIAS_SQL)
                .bind(pair.linking_identifier.as_str())
                .bind(pair.identifier.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow!(e))?;
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(inserted)
    }
}

// ── RunLock ──────────────────────────────────────────────────

#[async_trait]
impl RunLock for PgIdentityStore {
    async fn try_acquire_run_lock(&self) -> Result<bool> {
        let mut held = self.run_lock.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await.map_err(|e| anyhow!(e))?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| anyhow!(e))?;
        if acquired {
            *held = Some(conn);
        }
        Ok(acquired)
    }

    async fn release_run_lock(&self) -> Result<()> {
        let Some(mut conn) = self.run_lock.lock().await.take() else {
            return Ok(());
        };
        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}
