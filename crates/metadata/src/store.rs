//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    CertificateRepo, CountRepo, HostSoftwareRepo, InventoryRepo, TitleRepo, VulnerabilityRepo,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use canon_core::config::ReconcileConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite permits at most 999 bound parameters per statement on older builds.
const BATCH_SIZE: usize = 900;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    TitleRepo
    + HostSoftwareRepo
    + CertificateRepo
    + CountRepo
    + VulnerabilityRepo
    + InventoryRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    retry: RetryPolicy,
    count_batch_size: usize,
    /// Advisory: operations running longer than this are logged.
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: every write is serialized, and reads issued inside
        // a transaction must go through that transaction.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let reconcile = ReconcileConfig::default();
        let store = Self {
            pool,
            retry: RetryPolicy::from_config(&reconcile),
            count_batch_size: reconcile.count_batch_size,
            query_timeout: Duration::from_secs(query_timeout_secs),
        };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs,
            "SQLite query timeout is advisory only; use PostgreSQL for multi-writer deployments"
        );

        Ok(store)
    }

    /// Apply retry and batching settings.
    pub fn with_reconcile_config(mut self, config: &ReconcileConfig) -> Self {
        self.retry = RetryPolicy::from_config(config);
        self.count_batch_size = config.count_batch_size.max(1);
        self
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Pool used for pre-transaction reads. SQLite has no replicas.
    fn reader(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::is_unique_violation;
    use crate::models::*;
    use crate::reconcile::{certificates, host_software, titles};
    use crate::reconcile::TitleDecision;
    use crate::repos::certificates::CERTIFICATE_ORDER_KEYS;
    use crate::repos::counts::TITLE_ORDER_KEYS;
    use crate::repos::vulnerabilities::VULNERABILITY_ORDER_KEYS;
    use crate::repos::{CountSyncStats, TitleListOptions, VulnerabilityListOptions};
    use crate::retry::with_retry;
    use canon_core::certificate::CertificateFact;
    use canon_core::fingerprint::FingerprintService;
    use canon_core::inventory::OperatingSystemFact;
    use canon_core::listing::{CountScope, ListOptions, OrderDirection, PaginationMetadata};
    use canon_core::software::{SoftwareFact, title_key};
    use sqlx::{Connection, QueryBuilder, SqliteConnection};
    use std::collections::HashMap;
    use std::time::Instant;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Certificate rows per multi-row insert (24 columns each).
    const CERTIFICATE_INSERT_BATCH: usize = BATCH_SIZE / 24;

    /// Count rows per multi-row upsert (5 columns each).
    const MAX_COUNT_BATCH: usize = BATCH_SIZE / 5;

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    // -------------------------------------------------------------------------
    // Title resolution, shared by resolve_software and update_host_software.
    // Every helper runs on the caller's transaction.
    // -------------------------------------------------------------------------

    async fn software_by_checksum(
        conn: &mut SqliteConnection,
        checksum: &str,
    ) -> MetadataResult<Option<SoftwareRow>> {
        let row = sqlx::query_as::<_, SoftwareRow>("SELECT * FROM software WHERE checksum = ?")
            .bind(checksum)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn title_by_id(
        conn: &mut SqliteConnection,
        title_id: Uuid,
    ) -> MetadataResult<Option<TitleRow>> {
        let row = sqlx::query_as::<_, TitleRow>("SELECT * FROM software_titles WHERE title_id = ?")
            .bind(title_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn title_by_upgrade_code(
        conn: &mut SqliteConnection,
        upgrade_code: &str,
    ) -> MetadataResult<Option<TitleRow>> {
        let row =
            sqlx::query_as::<_, TitleRow>("SELECT * FROM software_titles WHERE upgrade_code = ?")
                .bind(upgrade_code)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row)
    }

    async fn titles_by_key(
        conn: &mut SqliteConnection,
        title_key: &str,
    ) -> MetadataResult<Vec<TitleRow>> {
        let rows = sqlx::query_as::<_, TitleRow>(
            "SELECT * FROM software_titles WHERE title_key = ? ORDER BY created_at, title_id",
        )
        .bind(title_key)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    async fn codeless_title_by_key(
        conn: &mut SqliteConnection,
        title_key: &str,
    ) -> MetadataResult<Option<TitleRow>> {
        let row = sqlx::query_as::<_, TitleRow>(
            r#"
            SELECT * FROM software_titles
            WHERE title_key = ? AND (upgrade_code IS NULL OR upgrade_code = '')
            ORDER BY created_at, title_id
            LIMIT 1
            "#,
        )
        .bind(title_key)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Insert a title for `fact` unless one with the same identity exists,
    /// then read back the authoritative row. Returns whether this call
    /// created it.
    async fn insert_title(
        conn: &mut SqliteConnection,
        fact: &SoftwareFact,
        now: OffsetDateTime,
    ) -> MetadataResult<(TitleRow, bool)> {
        let title_id = Uuid::new_v4();
        let name = fact.display_name();
        let source = fact.source.trim();
        let browser = fact.browser.trim();
        let upgrade_code = fact.upgrade_code();
        let title_key = fact.title_key();

        sqlx::query(
            r#"
            INSERT INTO software_titles (title_id, name, source, browser, bundle_identifier, upgrade_code, title_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(title_id)
        .bind(name)
        .bind(source)
        .bind(browser)
        .bind(fact.bundle_identifier.trim())
        .bind(upgrade_code.unwrap_or(""))
        .bind(&title_key)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let row = match upgrade_code {
            Some(code) => title_by_upgrade_code(conn, code).await?,
            None => codeless_title_by_key(conn, &title_key).await?,
        };
        let row = row.ok_or_else(|| {
            MetadataError::Internal(format!(
                "title for '{name}' ({source}) missing after insert"
            ))
        })?;
        let created = row.title_id == title_id;
        Ok((row, created))
    }

    /// Link to the title owning `upgrade_code`, creating it if nobody does.
    async fn redirect_to_upgrade_code(
        conn: &mut SqliteConnection,
        fact: &SoftwareFact,
        upgrade_code: &str,
        name_match: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<(Uuid, ResolutionOutcome)> {
        tracing::warn!(
            name = fact.display_name(),
            upgrade_code,
            %name_match,
            "name-matched title has a different upgrade code; linking by upgrade code instead"
        );
        if let Some(owner) = title_by_upgrade_code(conn, upgrade_code).await? {
            return Ok((owner.title_id, ResolutionOutcome::Redirected));
        }
        let (row, _) = insert_title(conn, fact, now).await?;
        Ok((row.title_id, ResolutionOutcome::Redirected))
    }

    /// Fill an empty upgrade code inside a savepoint.
    async fn backfill_upgrade_code(
        conn: &mut SqliteConnection,
        fact: &SoftwareFact,
        title_id: Uuid,
        upgrade_code: &str,
        was_null: bool,
        now: OffsetDateTime,
    ) -> MetadataResult<(Uuid, ResolutionOutcome)> {
        if was_null {
            tracing::warn!(%title_id, "title has NULL upgrade_code; treating it as empty");
        }

        let mut savepoint = conn.begin().await?;
        let result = sqlx::query(
            "UPDATE software_titles SET upgrade_code = ? WHERE title_id = ? AND (upgrade_code IS NULL OR upgrade_code = '')",
        )
        .bind(upgrade_code)
        .bind(title_id)
        .execute(&mut *savepoint)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                savepoint.commit().await?;
                tracing::info!(%title_id, upgrade_code, "backfilled title upgrade code");
                Ok((title_id, ResolutionOutcome::Backfilled))
            }
            Ok(_) => {
                savepoint.commit().await?;
                // A concurrent backfill got there first.
                let current = title_by_id(conn, title_id)
                    .await?
                    .ok_or_else(|| MetadataError::NotFound(format!("title {title_id}")))?;
                if current.upgrade_code() == Some(upgrade_code) {
                    Ok((title_id, ResolutionOutcome::Linked))
                } else {
                    redirect_to_upgrade_code(conn, fact, upgrade_code, title_id, now).await
                }
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
                let owner = title_by_upgrade_code(conn, upgrade_code)
                    .await?
                    .ok_or_else(|| {
                        MetadataError::Internal(format!(
                            "upgrade code {upgrade_code} reported as taken but no title owns it"
                        ))
                    })?;
                tracing::info!(
                    %title_id,
                    owner = %owner.title_id,
                    upgrade_code,
                    "upgrade code already owned by another title; linking to it"
                );
                Ok((owner.title_id, ResolutionOutcome::Redirected))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_title(
        conn: &mut SqliteConnection,
        fact: &SoftwareFact,
        now: OffsetDateTime,
    ) -> MetadataResult<(Uuid, ResolutionOutcome)> {
        let upgrade_code = fact.upgrade_code();
        let candidates = titles_by_key(conn, &fact.title_key()).await?;

        match titles::decide(&candidates, upgrade_code) {
            TitleDecision::Create => {
                let (row, created) = insert_title(conn, fact, now).await?;
                let outcome = if created {
                    ResolutionOutcome::Created
                } else {
                    ResolutionOutcome::Linked
                };
                Ok((row.title_id, outcome))
            }
            TitleDecision::Link { title_id } => Ok((title_id, ResolutionOutcome::Linked)),
            TitleDecision::Backfill { title_id, was_null } => {
                let Some(code) = upgrade_code else {
                    return Err(MetadataError::Internal(
                        "backfill decided without an upgrade code".to_string(),
                    ));
                };
                backfill_upgrade_code(conn, fact, title_id, code, was_null, now).await
            }
            TitleDecision::Redirect { name_match } => {
                let Some(code) = upgrade_code else {
                    return Err(MetadataError::Internal(
                        "redirect decided without an upgrade code".to_string(),
                    ));
                };
                redirect_to_upgrade_code(conn, fact, code, name_match, now).await
            }
        }
    }

    async fn insert_software(conn: &mut SqliteConnection, row: &SoftwareRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO software (software_id, title_id, name, version, source, browser, bundle_identifier,
                                  upgrade_code, release, vendor, arch, extension_id, checksum, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(checksum) DO NOTHING
            "#,
        )
        .bind(row.software_id)
        .bind(row.title_id)
        .bind(&row.name)
        .bind(&row.version)
        .bind(&row.source)
        .bind(&row.browser)
        .bind(&row.bundle_identifier)
        .bind(&row.upgrade_code)
        .bind(&row.release)
        .bind(&row.vendor)
        .bind(&row.arch)
        .bind(&row.extension_id)
        .bind(&row.checksum)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn resolve_in_tx(
        conn: &mut SqliteConnection,
        fact: &SoftwareFact,
        checksum: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<ResolvedSoftware> {
        if let Some(existing) = software_by_checksum(conn, checksum).await? {
            return Ok(ResolvedSoftware {
                software_id: existing.software_id,
                title_id: existing.title_id,
                outcome: ResolutionOutcome::Existing,
            });
        }

        let (title_id, outcome) = resolve_title(conn, fact, now).await?;
        let row = SoftwareRow::from_fact(Uuid::new_v4(), title_id, fact, checksum, now);
        insert_software(conn, &row).await?;

        let stored = software_by_checksum(conn, checksum).await?.ok_or_else(|| {
            MetadataError::Internal(format!("software {checksum} missing after insert"))
        })?;
        let outcome = if stored.software_id == row.software_id {
            outcome
        } else {
            ResolutionOutcome::Existing
        };
        tracing::debug!(
            name = fact.display_name(),
            version = %fact.version,
            software_id = %stored.software_id,
            title_id = %stored.title_id,
            ?outcome,
            "resolved software fact"
        );
        Ok(ResolvedSoftware {
            software_id: stored.software_id,
            title_id: stored.title_id,
            outcome,
        })
    }

    #[async_trait]
    impl TitleRepo for SqliteStore {
        async fn resolve_software(&self, fact: &SoftwareFact) -> MetadataResult<ResolvedSoftware> {
            fact.validate()?;
            let checksum = FingerprintService::software(fact).to_hex();
            let checksum = checksum.as_str();

            with_retry(&self.retry, "resolve_software", move || async move {
                let mut tx = self.pool.begin().await?;
                let resolved =
                    resolve_in_tx(&mut tx, fact, checksum, OffsetDateTime::now_utc()).await?;
                tx.commit().await?;
                Ok(resolved)
            })
            .await
        }

        async fn get_title(&self, title_id: Uuid) -> MetadataResult<Option<TitleRow>> {
            let row =
                sqlx::query_as::<_, TitleRow>("SELECT * FROM software_titles WHERE title_id = ?")
                    .bind(title_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn find_titles_by_name(
            &self,
            name: &str,
            source: &str,
            browser: &str,
        ) -> MetadataResult<Vec<TitleRow>> {
            let mut conn = self.pool.acquire().await?;
            titles_by_key(&mut conn, &title_key(name, source, browser)).await
        }

        async fn find_title_by_upgrade_code(
            &self,
            upgrade_code: &str,
        ) -> MetadataResult<Option<TitleRow>> {
            let upgrade_code = upgrade_code.trim();
            if upgrade_code.is_empty() {
                return Ok(None);
            }
            let mut conn = self.pool.acquire().await?;
            title_by_upgrade_code(&mut conn, upgrade_code).await
        }

        async fn get_software_by_checksum(
            &self,
            checksum: &str,
        ) -> MetadataResult<Option<SoftwareRow>> {
            let mut conn = self.pool.acquire().await?;
            software_by_checksum(&mut conn, checksum).await
        }

        async fn list_title_software(&self, title_id: Uuid) -> MetadataResult<Vec<SoftwareRow>> {
            let rows = sqlx::query_as::<_, SoftwareRow>(
                "SELECT * FROM software WHERE title_id = ? ORDER BY version, checksum",
            )
            .bind(title_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl HostSoftwareRepo for SqliteStore {
        async fn update_host_software(
            &self,
            host_id: i64,
            facts: &[SoftwareFact],
        ) -> MetadataResult<HostSoftwareUpdate> {
            let incoming = host_software::fingerprint_facts(facts)?;
            let current = sqlx::query_as::<_, HostSoftwareRow>(
                r#"
                SELECT hs.host_id, hs.software_id, s.checksum, hs.last_opened_at
                FROM host_software hs
                JOIN software s ON s.software_id = hs.software_id
                WHERE hs.host_id = ?
                "#,
            )
            .bind(host_id)
            .fetch_all(self.reader())
            .await?;

            let plan = host_software::plan(&current, &incoming);
            if plan.is_empty() {
                tracing::debug!(host_id, "host software unchanged");
                return Ok(HostSoftwareUpdate::default());
            }

            let plan = &plan;
            let incoming = &incoming;
            let update = with_retry(&self.retry, "update_host_software", move || async move {
                let now = OffsetDateTime::now_utc();
                let mut tx = self.pool.begin().await?;
                let mut update = HostSoftwareUpdate::default();

                for batch in plan.to_remove.chunks(BATCH_SIZE - 1) {
                    let sql = format!(
                        "DELETE FROM host_software WHERE host_id = ? AND software_id IN ({})",
                        placeholders(batch.len())
                    );
                    let mut query = sqlx::query(&sql).bind(host_id);
                    for software_id in batch {
                        query = query.bind(software_id);
                    }
                    query.execute(&mut *tx).await?;
                }
                update.deleted = plan.to_remove.clone();

                for checksum in &plan.to_add {
                    let Some(fact) = incoming.get(checksum) else {
                        continue;
                    };
                    let resolved = resolve_in_tx(&mut tx, fact, checksum, now).await?;
                    let result = sqlx::query(
                        "INSERT INTO host_software (host_id, software_id, last_opened_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                    )
                    .bind(host_id)
                    .bind(resolved.software_id)
                    .bind(fact.last_opened_at)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() > 0 {
                        update.inserted.push(resolved.software_id);
                    }
                }

                for (software_id, last_opened_at) in &plan.to_touch {
                    let result = sqlx::query(
                        "UPDATE host_software SET last_opened_at = ? WHERE host_id = ? AND software_id = ?",
                    )
                    .bind(*last_opened_at)
                    .bind(host_id)
                    .bind(*software_id)
                    .execute(&mut *tx)
                    .await?;
                    update.last_opened_updated += result.rows_affected() as usize;
                }

                tx.commit().await?;
                Ok(update)
            })
            .await?;

            tracing::info!(
                host_id,
                inserted = update.inserted.len(),
                deleted = update.deleted.len(),
                last_opened_updated = update.last_opened_updated,
                "updated host software"
            );
            Ok(update)
        }

        async fn list_host_software(&self, host_id: i64) -> MetadataResult<Vec<HostSoftwareItem>> {
            let rows = sqlx::query_as::<_, HostSoftwareItem>(
                r#"
                SELECT s.*, hs.last_opened_at
                FROM host_software hs
                JOIN software s ON s.software_id = hs.software_id
                WHERE hs.host_id = ?
                ORDER BY s.name, s.version, s.checksum
                "#,
            )
            .bind(host_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl CertificateRepo for SqliteStore {
        async fn update_host_certificates(
            &self,
            host_id: i64,
            incoming: &[CertificateFact],
        ) -> MetadataResult<CertificateSyncResult> {
            let normalized = incoming
                .iter()
                .map(CertificateFact::normalized)
                .collect::<Result<Vec<_>, _>>()?;
            let (deduped, duplicates) = certificates::dedupe_by_sha1(normalized);
            for sha1_sum in &duplicates {
                tracing::warn!(
                    host_id,
                    sha1_sum = %sha1_sum,
                    "duplicate certificate fingerprint in report; keeping the first"
                );
            }

            let existing = sqlx::query_as::<_, HostCertificateRow>(
                "SELECT * FROM host_certificates WHERE host_id = ? AND deleted_at IS NULL",
            )
            .bind(host_id)
            .fetch_all(self.reader())
            .await?;

            let plan = certificates::diff(&existing, deduped);
            if plan.is_empty() {
                return Ok(CertificateSyncResult {
                    inserted: 0,
                    deleted: 0,
                    unchanged: plan.unchanged,
                });
            }

            let plan_ref = &plan;
            let (inserted, deleted) =
                with_retry(&self.retry, "update_host_certificates", move || async move {
                    let now = OffsetDateTime::now_utc();
                    let rows: Vec<HostCertificateRow> = plan_ref
                        .to_insert
                        .iter()
                        .map(|fact| HostCertificateRow::from_fact(Uuid::new_v4(), host_id, fact, now))
                        .collect();

                    let mut tx = self.pool.begin().await?;
                    let mut inserted = 0u64;
                    for batch in rows.chunks(CERTIFICATE_INSERT_BATCH) {
                        let mut qb = QueryBuilder::<Sqlite>::new(
                            r#"INSERT INTO host_certificates (
                                certificate_id, host_id, sha1_sum, not_valid_before, not_valid_after,
                                certificate_authority, common_name, key_algorithm, key_strength, key_usage,
                                serial, signing_algorithm, subject_country, subject_org, subject_org_unit,
                                subject_common_name, issuer_country, issuer_org, issuer_org_unit,
                                issuer_common_name, source, username, created_at, updated_at) "#,
                        );
                        qb.push_values(batch, |mut b, row| {
                            b.push_bind(row.certificate_id)
                                .push_bind(row.host_id)
                                .push_bind(&row.sha1_sum)
                                .push_bind(row.not_valid_before)
                                .push_bind(row.not_valid_after)
                                .push_bind(row.certificate_authority)
                                .push_bind(&row.common_name)
                                .push_bind(&row.key_algorithm)
                                .push_bind(row.key_strength)
                                .push_bind(&row.key_usage)
                                .push_bind(&row.serial)
                                .push_bind(&row.signing_algorithm)
                                .push_bind(&row.subject_country)
                                .push_bind(&row.subject_org)
                                .push_bind(&row.subject_org_unit)
                                .push_bind(&row.subject_common_name)
                                .push_bind(&row.issuer_country)
                                .push_bind(&row.issuer_org)
                                .push_bind(&row.issuer_org_unit)
                                .push_bind(&row.issuer_common_name)
                                .push_bind(&row.source)
                                .push_bind(&row.username)
                                .push_bind(row.created_at)
                                .push_bind(row.updated_at);
                        });
                        qb.push(" ON CONFLICT DO NOTHING");
                        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
                    }

                    let mut deleted = 0u64;
                    for batch in plan_ref.to_delete.chunks(BATCH_SIZE - 2) {
                        let sql = format!(
                            "UPDATE host_certificates SET deleted_at = ?, updated_at = ? WHERE deleted_at IS NULL AND certificate_id IN ({})",
                            placeholders(batch.len())
                        );
                        let mut query = sqlx::query(&sql).bind(now).bind(now);
                        for certificate_id in batch {
                            query = query.bind(certificate_id);
                        }
                        deleted += query.execute(&mut *tx).await?.rows_affected();
                    }

                    tx.commit().await?;
                    Ok((inserted as usize, deleted as usize))
                })
                .await?;

            tracing::info!(
                host_id,
                inserted,
                deleted,
                unchanged = plan.unchanged,
                "updated host certificates"
            );
            Ok(CertificateSyncResult {
                inserted,
                deleted,
                unchanged: plan.unchanged,
            })
        }

        async fn list_host_certificates(
            &self,
            host_id: i64,
            opts: &ListOptions,
        ) -> MetadataResult<(Vec<HostCertificateRow>, PaginationMetadata)> {
            let (key, direction) = opts.resolve_order(
                CERTIFICATE_ORDER_KEYS,
                ("common_name", OrderDirection::Asc),
            )?;
            let sql = format!(
                "SELECT * FROM host_certificates WHERE host_id = ? AND deleted_at IS NULL ORDER BY {key} {}, certificate_id LIMIT ? OFFSET ?",
                direction.as_sql()
            );
            let mut rows = sqlx::query_as::<_, HostCertificateRow>(&sql)
                .bind(host_id)
                .bind(i64::from(opts.limit()) + 1)
                .bind(opts.offset() as i64)
                .fetch_all(&self.pool)
                .await?;
            let meta = PaginationMetadata::from_overfetch(&mut rows, opts);
            Ok((rows, meta))
        }
    }

    // -------------------------------------------------------------------------
    // Aggregate counts
    // -------------------------------------------------------------------------

    /// Aggregate key: a title / software id, or a CVE.
    enum CountKey {
        Id(Uuid),
        Cve(String),
    }

    struct CountRow {
        key: CountKey,
        team_id: i64,
        global_stats: bool,
        hosts_count: i64,
    }

    #[derive(Clone, Copy)]
    enum CountTable {
        Titles,
        Software,
        Vulnerabilities,
    }

    impl CountTable {
        fn table(self) -> &'static str {
            match self {
                Self::Titles => "title_host_counts",
                Self::Software => "software_host_counts",
                Self::Vulnerabilities => "vulnerability_host_counts",
            }
        }

        fn key_column(self) -> &'static str {
            match self {
                Self::Titles => "title_id",
                Self::Software => "software_id",
                Self::Vulnerabilities => "cve",
            }
        }

        fn operation(self) -> &'static str {
            match self {
                Self::Titles => "sync_title_host_counts",
                Self::Software => "sync_software_host_counts",
                Self::Vulnerabilities => "sync_vulnerability_host_counts",
            }
        }
    }

    /// Distinct hosts per title: global, per team, and hosts without a team.
    const TITLE_COUNTS_SQL: &str = r#"
        SELECT s.title_id, 0, 1, COUNT(DISTINCT hs.host_id)
        FROM host_software hs
        JOIN software s ON s.software_id = hs.software_id
        GROUP BY s.title_id
        UNION ALL
        SELECT s.title_id, h.team_id, 0, COUNT(DISTINCT hs.host_id)
        FROM host_software hs
        JOIN software s ON s.software_id = hs.software_id
        JOIN hosts h ON h.host_id = hs.host_id
        WHERE h.team_id IS NOT NULL
        GROUP BY s.title_id, h.team_id
        UNION ALL
        SELECT s.title_id, 0, 0, COUNT(DISTINCT hs.host_id)
        FROM host_software hs
        JOIN software s ON s.software_id = hs.software_id
        LEFT JOIN hosts h ON h.host_id = hs.host_id
        WHERE h.team_id IS NULL
        GROUP BY s.title_id
    "#;

    const SOFTWARE_COUNTS_SQL: &str = r#"
        SELECT hs.software_id, 0, 1, COUNT(DISTINCT hs.host_id)
        FROM host_software hs
        GROUP BY hs.software_id
        UNION ALL
        SELECT hs.software_id, h.team_id, 0, COUNT(DISTINCT hs.host_id)
        FROM host_software hs
        JOIN hosts h ON h.host_id = hs.host_id
        WHERE h.team_id IS NOT NULL
        GROUP BY hs.software_id, h.team_id
        UNION ALL
        SELECT hs.software_id, 0, 0, COUNT(DISTINCT hs.host_id)
        FROM host_software hs
        LEFT JOIN hosts h ON h.host_id = hs.host_id
        WHERE h.team_id IS NULL
        GROUP BY hs.software_id
    "#;

    /// Hosts affected through installed software or their operating system.
    const VULNERABILITY_COUNTS_SQL: &str = r#"
        WITH vuln_hosts AS (
            SELECT sc.cve AS cve, hs.host_id AS host_id
            FROM software_cve sc
            JOIN host_software hs ON hs.software_id = sc.software_id
            UNION
            SELECT ov.cve AS cve, ho.host_id AS host_id
            FROM operating_system_vulnerabilities ov
            JOIN host_operating_system ho ON ho.os_id = ov.os_id
        )
        SELECT vh.cve, 0, 1, COUNT(DISTINCT vh.host_id)
        FROM vuln_hosts vh
        GROUP BY vh.cve
        UNION ALL
        SELECT vh.cve, h.team_id, 0, COUNT(DISTINCT vh.host_id)
        FROM vuln_hosts vh
        JOIN hosts h ON h.host_id = vh.host_id
        WHERE h.team_id IS NOT NULL
        GROUP BY vh.cve, h.team_id
        UNION ALL
        SELECT vh.cve, 0, 0, COUNT(DISTINCT vh.host_id)
        FROM vuln_hosts vh
        LEFT JOIN hosts h ON h.host_id = vh.host_id
        WHERE h.team_id IS NULL
        GROUP BY vh.cve
    "#;

    async fn compute_counts(
        conn: &mut SqliteConnection,
        table: CountTable,
    ) -> MetadataResult<Vec<CountRow>> {
        let rows = match table {
            CountTable::Titles | CountTable::Software => {
                let sql = match table {
                    CountTable::Titles => TITLE_COUNTS_SQL,
                    _ => SOFTWARE_COUNTS_SQL,
                };
                sqlx::query_as::<_, (Uuid, i64, bool, i64)>(sql)
                    .fetch_all(&mut *conn)
                    .await?
                    .into_iter()
                    .map(|(id, team_id, global_stats, hosts_count)| CountRow {
                        key: CountKey::Id(id),
                        team_id,
                        global_stats,
                        hosts_count,
                    })
                    .collect()
            }
            CountTable::Vulnerabilities => {
                sqlx::query_as::<_, (String, i64, bool, i64)>(VULNERABILITY_COUNTS_SQL)
                    .fetch_all(&mut *conn)
                    .await?
                    .into_iter()
                    .map(|(cve, team_id, global_stats, hosts_count)| CountRow {
                        key: CountKey::Cve(cve),
                        team_id,
                        global_stats,
                        hosts_count,
                    })
                    .collect()
            }
        };
        Ok(rows)
    }

    async fn upsert_counts(
        conn: &mut SqliteConnection,
        table: CountTable,
        batch: &[CountRow],
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO {} ({}, team_id, global_stats, hosts_count, updated_at) ",
            table.table(),
            table.key_column()
        ));
        qb.push_values(batch, |mut b, row| {
            match &row.key {
                CountKey::Id(id) => b.push_bind(*id),
                CountKey::Cve(cve) => b.push_bind(cve.clone()),
            };
            b.push_bind(row.team_id)
                .push_bind(row.global_stats)
                .push_bind(row.hosts_count)
                .push_bind(now);
        });
        qb.push(format!(
            " ON CONFLICT ({}, team_id, global_stats) DO UPDATE SET hosts_count = excluded.hosts_count, updated_at = excluded.updated_at",
            table.key_column()
        ));
        qb.build().execute(&mut *conn).await?;
        Ok(())
    }

    impl SqliteStore {
        async fn sync_counts(
            &self,
            table: CountTable,
            now: OffsetDateTime,
        ) -> MetadataResult<CountSyncStats> {
            let started = Instant::now();
            let batch_size = self.count_batch_size.clamp(1, MAX_COUNT_BATCH);

            let stats = with_retry(&self.retry, table.operation(), move || async move {
                let mut tx = self.pool.begin().await?;
                sqlx::query(&format!("UPDATE {} SET hosts_count = 0", table.table()))
                    .execute(&mut *tx)
                    .await?;

                let rows = compute_counts(&mut tx, table).await?;
                for batch in rows.chunks(batch_size) {
                    upsert_counts(&mut tx, table, batch, now).await?;
                }

                let pruned = sqlx::query(&format!(
                    "DELETE FROM {} WHERE hosts_count = 0",
                    table.table()
                ))
                .execute(&mut *tx)
                .await?
                .rows_affected();

                tx.commit().await?;
                Ok(CountSyncStats {
                    upserted: rows.len(),
                    pruned,
                })
            })
            .await?;

            let elapsed = started.elapsed();
            if elapsed > self.query_timeout {
                tracing::warn!(
                    table = table.table(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "count sync exceeded query timeout"
                );
            }
            tracing::info!(
                table = table.table(),
                upserted = stats.upserted,
                pruned = stats.pruned,
                elapsed_ms = elapsed.as_millis() as u64,
                "synced host counts"
            );
            Ok(stats)
        }
    }

    fn search_pattern(search: Option<&str>) -> Option<String> {
        search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()))
    }

    fn push_title_filters(qb: &mut QueryBuilder<'_, Sqlite>, opts: &TitleListOptions) {
        qb.push(
            " FROM software_titles st JOIN title_host_counts thc ON thc.title_id = st.title_id WHERE thc.team_id = ",
        )
        .push_bind(opts.scope.team_id())
        .push(" AND thc.global_stats = ")
        .push_bind(opts.scope.global_stats())
        .push(" AND thc.hosts_count > 0");

        if opts.vulnerable_only {
            qb.push(
                " AND EXISTS (SELECT 1 FROM software s JOIN software_cve sc ON sc.software_id = s.software_id WHERE s.title_id = st.title_id)",
            );
        }
        if let Some(pattern) = search_pattern(opts.search.as_deref()) {
            qb.push(" AND (lower(st.name) LIKE ")
                .push_bind(pattern.clone())
                .push(
                    " OR EXISTS (SELECT 1 FROM software s JOIN software_cve sc ON sc.software_id = s.software_id WHERE s.title_id = st.title_id AND lower(sc.cve) LIKE ",
                )
                .push_bind(pattern)
                .push("))");
        }
    }

    #[async_trait]
    impl CountRepo for SqliteStore {
        async fn sync_title_host_counts(
            &self,
            now: OffsetDateTime,
        ) -> MetadataResult<CountSyncStats> {
            self.sync_counts(CountTable::Titles, now).await
        }

        async fn sync_software_host_counts(
            &self,
            now: OffsetDateTime,
        ) -> MetadataResult<CountSyncStats> {
            self.sync_counts(CountTable::Software, now).await
        }

        async fn sync_vulnerability_host_counts(
            &self,
            now: OffsetDateTime,
        ) -> MetadataResult<CountSyncStats> {
            self.sync_counts(CountTable::Vulnerabilities, now).await
        }

        async fn list_software_titles(
            &self,
            opts: &TitleListOptions,
        ) -> MetadataResult<(Vec<SoftwareTitleListItem>, i64, PaginationMetadata)> {
            let (key, direction) = opts
                .list
                .resolve_order(TITLE_ORDER_KEYS, ("hosts_count", OrderDirection::Desc))?;
            let order_expr = match key {
                "name" => "st.name",
                "source" => "st.source",
                "versions_count" => "versions_count",
                _ => "thc.hosts_count",
            };

            let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
            push_title_filters(&mut count_qb, opts);
            let total: i64 = count_qb
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await?;

            let mut qb = QueryBuilder::<Sqlite>::new(
                r#"SELECT st.*, thc.hosts_count, thc.updated_at AS counts_updated_at,
                    (SELECT COUNT(*) FROM software_host_counts shc
                     JOIN software s ON s.software_id = shc.software_id
                     WHERE s.title_id = st.title_id AND shc.team_id = thc.team_id
                       AND shc.global_stats = thc.global_stats AND shc.hosts_count > 0) AS versions_count"#,
            );
            push_title_filters(&mut qb, opts);
            qb.push(format!(
                " ORDER BY {order_expr} {}, st.title_id ASC LIMIT ",
                direction.as_sql()
            ))
            .push_bind(i64::from(opts.list.limit()) + 1)
            .push(" OFFSET ")
            .push_bind(opts.list.offset() as i64);

            let mut items: Vec<SoftwareTitleListItem> =
                qb.build_query_as::<SoftwareTitleListItem>().fetch_all(&self.pool).await?;
            let meta = PaginationMetadata::from_overfetch(&mut items, &opts.list);

            if !items.is_empty() {
                let sql = format!(
                    r#"SELECT DISTINCT s.title_id, sc.cve
                       FROM software s JOIN software_cve sc ON sc.software_id = s.software_id
                       WHERE s.title_id IN ({})
                       ORDER BY sc.cve"#,
                    placeholders(items.len())
                );
                let mut query = sqlx::query_as::<_, (Uuid, String)>(&sql);
                for item in &items {
                    query = query.bind(item.title.title_id);
                }
                let mut by_title: HashMap<Uuid, Vec<String>> = HashMap::new();
                for (title_id, cve) in query.fetch_all(&self.pool).await? {
                    by_title.entry(title_id).or_default().push(cve);
                }
                for item in &mut items {
                    item.vulnerabilities = by_title.remove(&item.title.title_id).unwrap_or_default();
                }
            }

            Ok((items, total, meta))
        }

        async fn get_title_host_count(
            &self,
            title_id: Uuid,
            scope: CountScope,
        ) -> MetadataResult<i64> {
            let count: Option<i64> = sqlx::query_scalar(
                "SELECT hosts_count FROM title_host_counts WHERE title_id = ? AND team_id = ? AND global_stats = ?",
            )
            .bind(title_id)
            .bind(scope.team_id())
            .bind(scope.global_stats())
            .fetch_optional(&self.pool)
            .await?;
            Ok(count.unwrap_or(0))
        }
    }

    // -------------------------------------------------------------------------
    // Vulnerabilities
    // -------------------------------------------------------------------------

    const VULNERABILITY_SELECT: &str = r#"SELECT vhc.cve, cm.cvss_score, cm.epss_probability,
            cm.cisa_known_exploit, cm.published, cm.description, vhc.hosts_count,
            EXISTS (SELECT 1 FROM software_cve sc WHERE sc.cve = vhc.cve) AS affects_software,
            EXISTS (SELECT 1 FROM operating_system_vulnerabilities ov WHERE ov.cve = vhc.cve) AS affects_os,
            vhc.updated_at AS counts_updated_at
        FROM vulnerability_host_counts vhc
        LEFT JOIN cve_meta cm ON cm.cve = vhc.cve"#;

    fn push_vulnerability_filters(
        qb: &mut QueryBuilder<'_, Sqlite>,
        scope: CountScope,
        known_exploit: bool,
        search: Option<&str>,
    ) {
        qb.push(" WHERE vhc.team_id = ")
            .push_bind(scope.team_id())
            .push(" AND vhc.global_stats = ")
            .push_bind(scope.global_stats())
            .push(" AND vhc.hosts_count > 0");
        if known_exploit {
            qb.push(" AND cm.cisa_known_exploit = ").push_bind(true);
        }
        if let Some(pattern) = search_pattern(search) {
            qb.push(" AND lower(vhc.cve) LIKE ").push_bind(pattern);
        }
    }

    fn validate_cve(cve: &str) -> MetadataResult<()> {
        if cve.trim().is_empty() {
            return Err(MetadataError::Validation("cve is empty".to_string()));
        }
        Ok(())
    }

    #[async_trait]
    impl VulnerabilityRepo for SqliteStore {
        async fn upsert_cve_meta(&self, rows: &[CveMetaRow]) -> MetadataResult<()> {
            for row in rows {
                validate_cve(&row.cve)?;
            }
            with_retry(&self.retry, "upsert_cve_meta", move || async move {
                let mut tx = self.pool.begin().await?;
                for row in rows {
                    sqlx::query(
                        r#"
                        INSERT INTO cve_meta (cve, cvss_score, epss_probability, cisa_known_exploit, published, description)
                        VALUES (?, ?, ?, ?, ?, ?)
                        ON CONFLICT(cve) DO UPDATE SET
                            cvss_score = excluded.cvss_score,
                            epss_probability = excluded.epss_probability,
                            cisa_known_exploit = excluded.cisa_known_exploit,
                            published = excluded.published,
                            description = excluded.description
                        "#,
                    )
                    .bind(row.cve.trim())
                    .bind(row.cvss_score)
                    .bind(row.epss_probability)
                    .bind(row.cisa_known_exploit)
                    .bind(row.published)
                    .bind(&row.description)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                Ok(())
            })
            .await
        }

        async fn insert_software_vulnerability(
            &self,
            row: &SoftwareVulnerabilityRow,
        ) -> MetadataResult<bool> {
            validate_cve(&row.cve)?;
            let result = sqlx::query(
                r#"
                INSERT INTO software_cve (software_id, cve, source, resolved_in_version, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.software_id)
            .bind(row.cve.trim())
            .bind(&row.source)
            .bind(&row.resolved_in_version)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn insert_os_vulnerability(&self, row: &OsVulnerabilityRow) -> MetadataResult<bool> {
            validate_cve(&row.cve)?;
            let result = sqlx::query(
                r#"
                INSERT INTO operating_system_vulnerabilities (os_id, cve, source, resolved_in_version, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.os_id)
            .bind(row.cve.trim())
            .bind(&row.source)
            .bind(&row.resolved_in_version)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_vulnerabilities(
            &self,
            opts: &VulnerabilityListOptions,
        ) -> MetadataResult<(Vec<VulnerabilityListItem>, i64, PaginationMetadata)> {
            let (key, direction) = opts
                .list
                .resolve_order(VULNERABILITY_ORDER_KEYS, ("hosts_count", OrderDirection::Desc))?;
            let order_expr = match key {
                "cve" => "vhc.cve",
                "cvss_score" => "cm.cvss_score",
                "epss_probability" => "cm.epss_probability",
                "published" => "cm.published",
                _ => "vhc.hosts_count",
            };

            let mut count_qb = QueryBuilder::<Sqlite>::new(
                "SELECT COUNT(*) FROM vulnerability_host_counts vhc LEFT JOIN cve_meta cm ON cm.cve = vhc.cve",
            );
            push_vulnerability_filters(
                &mut count_qb,
                opts.scope,
                opts.known_exploit,
                opts.search.as_deref(),
            );
            let total: i64 = count_qb
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await?;

            let mut qb = QueryBuilder::<Sqlite>::new(VULNERABILITY_SELECT);
            push_vulnerability_filters(
                &mut qb,
                opts.scope,
                opts.known_exploit,
                opts.search.as_deref(),
            );
            // NULL metadata sorts last in either direction.
            qb.push(format!(
                " ORDER BY {order_expr} {} NULLS LAST, vhc.cve ASC LIMIT ",
                direction.as_sql()
            ))
            .push_bind(i64::from(opts.list.limit()) + 1)
            .push(" OFFSET ")
            .push_bind(opts.list.offset() as i64);

            let mut items: Vec<VulnerabilityListItem> =
                qb.build_query_as::<VulnerabilityListItem>().fetch_all(&self.pool).await?;
            let meta = PaginationMetadata::from_overfetch(&mut items, &opts.list);
            Ok((items, total, meta))
        }

        async fn get_vulnerability(
            &self,
            cve: &str,
            scope: CountScope,
        ) -> MetadataResult<VulnerabilityDetail> {
            let cve = cve.trim();
            let mut qb = QueryBuilder::<Sqlite>::new(VULNERABILITY_SELECT);
            push_vulnerability_filters(&mut qb, scope, false, None);
            qb.push(" AND vhc.cve = ").push_bind(cve);
            let summary: VulnerabilityListItem = qb
                .build_query_as::<VulnerabilityListItem>()
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("vulnerability {cve}")))?;

            let software = sqlx::query_as::<_, VulnerableSoftwareItem>(
                r#"
                SELECT s.software_id, s.title_id, s.name, s.version, s.source,
                       sc.resolved_in_version, shc.hosts_count
                FROM software_cve sc
                JOIN software s ON s.software_id = sc.software_id
                JOIN software_host_counts shc ON shc.software_id = s.software_id
                WHERE sc.cve = ? AND shc.team_id = ? AND shc.global_stats = ? AND shc.hosts_count > 0
                ORDER BY s.name, s.version
                "#,
            )
            .bind(cve)
            .bind(scope.team_id())
            .bind(scope.global_stats())
            .fetch_all(&self.pool)
            .await?;

            let mut os_qb = QueryBuilder::<Sqlite>::new(
                r#"SELECT os.os_id, os.name, os.version, os.arch, ov.resolved_in_version
                   FROM operating_system_vulnerabilities ov
                   JOIN operating_systems os ON os.os_id = ov.os_id
                   WHERE ov.cve = "#,
            );
            os_qb.push_bind(cve).push(
                " AND EXISTS (SELECT 1 FROM host_operating_system ho LEFT JOIN hosts h ON h.host_id = ho.host_id WHERE ho.os_id = os.os_id",
            );
            match scope {
                CountScope::Global => {}
                CountScope::NoTeam => {
                    os_qb.push(" AND h.team_id IS NULL");
                }
                CountScope::Team(team_id) => {
                    os_qb.push(" AND h.team_id = ").push_bind(team_id);
                }
            }
            os_qb.push(") ORDER BY os.name, os.version, os.arch");
            let operating_systems: Vec<VulnerableOsItem> =
                os_qb.build_query_as::<VulnerableOsItem>().fetch_all(&self.pool).await?;

            Ok(VulnerabilityDetail {
                summary,
                software,
                operating_systems,
            })
        }
    }

    // -------------------------------------------------------------------------
    // Inventory
    // -------------------------------------------------------------------------

    #[async_trait]
    impl InventoryRepo for SqliteStore {
        async fn upsert_team(&self, team: &TeamRow) -> MetadataResult<()> {
            if team.team_id <= 0 {
                return Err(MetadataError::Validation(format!(
                    "team_id must be positive, got {}",
                    team.team_id
                )));
            }
            sqlx::query(
                "INSERT INTO teams (team_id, name, created_at) VALUES (?, ?, ?) ON CONFLICT(team_id) DO UPDATE SET name = excluded.name",
            )
            .bind(team.team_id)
            .bind(&team.name)
            .bind(team.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn upsert_host(&self, host: &HostRow) -> MetadataResult<()> {
            if let Some(team_id) = host.team_id
                && team_id <= 0
            {
                return Err(MetadataError::Validation(format!(
                    "host {} has invalid team_id {team_id}",
                    host.host_id
                )));
            }
            sqlx::query(
                r#"
                INSERT INTO hosts (host_id, hostname, team_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(host_id) DO UPDATE SET
                    hostname = excluded.hostname,
                    team_id = excluded.team_id,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(host.host_id)
            .bind(&host.hostname)
            .bind(host.team_id)
            .bind(host.created_at)
            .bind(host.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_host(&self, host_id: i64) -> MetadataResult<Option<HostRow>> {
            let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE host_id = ?")
                .bind(host_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn set_host_operating_system(
            &self,
            host_id: i64,
            os: &OperatingSystemFact,
        ) -> MetadataResult<Uuid> {
            if os.name.trim().is_empty() {
                return Err(MetadataError::Validation(
                    "operating system name is empty".to_string(),
                ));
            }
            with_retry(&self.retry, "set_host_operating_system", move || async move {
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    "INSERT INTO operating_systems (os_id, name, version, arch) VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(Uuid::new_v4())
                .bind(os.name.trim())
                .bind(os.version.trim())
                .bind(os.arch.trim())
                .execute(&mut *tx)
                .await?;

                let os_id: Uuid = sqlx::query_scalar(
                    "SELECT os_id FROM operating_systems WHERE name = ? AND version = ? AND arch = ?",
                )
                .bind(os.name.trim())
                .bind(os.version.trim())
                .bind(os.arch.trim())
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO host_operating_system (host_id, os_id) VALUES (?, ?) ON CONFLICT(host_id) DO UPDATE SET os_id = excluded.os_id",
                )
                .bind(host_id)
                .bind(os_id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(os_id)
            })
            .await
        }

        async fn get_host_operating_system(
            &self,
            host_id: i64,
        ) -> MetadataResult<Option<OperatingSystemRow>> {
            let row = sqlx::query_as::<_, OperatingSystemRow>(
                r#"
                SELECT os.os_id, os.name, os.version, os.arch
                FROM host_operating_system ho
                JOIN operating_systems os ON os.os_id = ho.os_id
                WHERE ho.host_id = ?
                "#,
            )
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Inventory
CREATE TABLE IF NOT EXISTS teams (
    team_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hosts (
    host_id INTEGER PRIMARY KEY,
    hostname TEXT NOT NULL,
    team_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hosts_team ON hosts(team_id);

CREATE TABLE IF NOT EXISTS operating_systems (
    os_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '',
    arch TEXT NOT NULL DEFAULT '',
    UNIQUE(name, version, arch)
);

CREATE TABLE IF NOT EXISTS host_operating_system (
    host_id INTEGER PRIMARY KEY,
    os_id BLOB NOT NULL REFERENCES operating_systems(os_id)
);
CREATE INDEX IF NOT EXISTS idx_host_operating_system_os ON host_operating_system(os_id);

-- Software catalog
CREATE TABLE IF NOT EXISTS software_titles (
    title_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    source TEXT NOT NULL,
    browser TEXT NOT NULL DEFAULT '',
    bundle_identifier TEXT NOT NULL DEFAULT '',
    upgrade_code TEXT DEFAULT '',
    -- Case-folded (name, source, browser), built by the application.
    title_key TEXT NOT NULL,
    created_at TEXT NOT NULL
);
-- An upgrade code identifies at most one title.
CREATE UNIQUE INDEX IF NOT EXISTS idx_software_titles_upgrade_code
    ON software_titles(upgrade_code)
    WHERE upgrade_code IS NOT NULL AND upgrade_code <> '';
-- Titles without an upgrade code are unique by title key.
CREATE UNIQUE INDEX IF NOT EXISTS idx_software_titles_codeless_key
    ON software_titles(title_key)
    WHERE upgrade_code IS NULL OR upgrade_code = '';
CREATE INDEX IF NOT EXISTS idx_software_titles_key
    ON software_titles(title_key);

CREATE TABLE IF NOT EXISTS software (
    software_id BLOB PRIMARY KEY,
    title_id BLOB NOT NULL REFERENCES software_titles(title_id),
    name TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL,
    browser TEXT NOT NULL DEFAULT '',
    bundle_identifier TEXT NOT NULL DEFAULT '',
    upgrade_code TEXT,
    release TEXT NOT NULL DEFAULT '',
    vendor TEXT NOT NULL DEFAULT '',
    arch TEXT NOT NULL DEFAULT '',
    extension_id TEXT NOT NULL DEFAULT '',
    checksum TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_software_title ON software(title_id);

CREATE TABLE IF NOT EXISTS host_software (
    host_id INTEGER NOT NULL,
    software_id BLOB NOT NULL REFERENCES software(software_id),
    last_opened_at TEXT,
    PRIMARY KEY (host_id, software_id)
);
CREATE INDEX IF NOT EXISTS idx_host_software_software ON host_software(software_id);

-- Host certificates (soft-deleted, never removed)
CREATE TABLE IF NOT EXISTS host_certificates (
    certificate_id BLOB PRIMARY KEY,
    host_id INTEGER NOT NULL,
    sha1_sum TEXT NOT NULL,
    not_valid_before TEXT NOT NULL,
    not_valid_after TEXT NOT NULL,
    certificate_authority INTEGER NOT NULL DEFAULT 0,
    common_name TEXT NOT NULL DEFAULT '',
    key_algorithm TEXT NOT NULL DEFAULT '',
    key_strength INTEGER NOT NULL DEFAULT 0,
    key_usage TEXT NOT NULL DEFAULT '',
    serial TEXT NOT NULL DEFAULT '',
    signing_algorithm TEXT NOT NULL DEFAULT '',
    subject_country TEXT NOT NULL DEFAULT '',
    subject_org TEXT NOT NULL DEFAULT '',
    subject_org_unit TEXT NOT NULL DEFAULT '',
    subject_common_name TEXT NOT NULL DEFAULT '',
    issuer_country TEXT NOT NULL DEFAULT '',
    issuer_org TEXT NOT NULL DEFAULT '',
    issuer_org_unit TEXT NOT NULL DEFAULT '',
    issuer_common_name TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT 'system',
    username TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
-- At most one live row per host and fingerprint.
CREATE UNIQUE INDEX IF NOT EXISTS idx_host_certificates_live
    ON host_certificates(host_id, sha1_sum)
    WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_host_certificates_host ON host_certificates(host_id, deleted_at);

-- Vulnerability catalog
CREATE TABLE IF NOT EXISTS cve_meta (
    cve TEXT PRIMARY KEY,
    cvss_score REAL,
    epss_probability REAL,
    cisa_known_exploit INTEGER,
    published TEXT,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS software_cve (
    software_id BLOB NOT NULL REFERENCES software(software_id),
    cve TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    resolved_in_version TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (software_id, cve)
);
CREATE INDEX IF NOT EXISTS idx_software_cve_cve ON software_cve(cve);

CREATE TABLE IF NOT EXISTS operating_system_vulnerabilities (
    os_id BLOB NOT NULL REFERENCES operating_systems(os_id),
    cve TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    resolved_in_version TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (os_id, cve)
);
CREATE INDEX IF NOT EXISTS idx_os_vulnerabilities_cve ON operating_system_vulnerabilities(cve);

-- Aggregate counts. Global rows are (team_id 0, global_stats 1); hosts
-- without a team are (0, 0).
CREATE TABLE IF NOT EXISTS title_host_counts (
    title_id BLOB NOT NULL,
    team_id INTEGER NOT NULL DEFAULT 0,
    global_stats INTEGER NOT NULL DEFAULT 0,
    hosts_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (title_id, team_id, global_stats)
);

CREATE TABLE IF NOT EXISTS software_host_counts (
    software_id BLOB NOT NULL,
    team_id INTEGER NOT NULL DEFAULT 0,
    global_stats INTEGER NOT NULL DEFAULT 0,
    hosts_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (software_id, team_id, global_stats)
);

CREATE TABLE IF NOT EXISTS vulnerability_host_counts (
    cve TEXT NOT NULL,
    team_id INTEGER NOT NULL DEFAULT 0,
    global_stats INTEGER NOT NULL DEFAULT 0,
    hosts_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (cve, team_id, global_stats)
);
"#;
