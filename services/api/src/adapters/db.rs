//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the PostgreSQL implementation of
//! the `CardStore`, `PriorityQueueStore` and `MentionStore` ports from the
//! `guide_core` crate. It handles all interactions with the database using `sqlx`.
//!
//! Sections live in their own table keyed by `(card_uuid, section_key)`, so a
//! section write is a single-row upsert that cannot disturb any other key.
//! Mention counts are bumped with one `INSERT .. ON CONFLICT DO UPDATE`
//! statement rather than a read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guide_core::ports::{
    CardFields, CardFilter, CardSort, CardStore, MentionStore, NameCursor, PortError, PortResult,
    PriorityCounts, PriorityQueueStore, PriorityRequest, SectionRefresh,
};
use guide_core::{
    Analysis, AnalysisStatus, Card, CardAttributes, GuideBody, MentionEntry, PriorityEntry,
    PublicationStatus, Section,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_sections(
        &self,
        uuids: Vec<String>,
    ) -> PortResult<BTreeMap<String, BTreeMap<String, Section>>> {
        let records = sqlx::query_as::<_, SectionRecord>(
            "SELECT card_uuid, section_key, title, content, model_used, generated_at \
             FROM card_sections WHERE card_uuid = ANY($1)",
        )
        .bind(uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?;

        let mut by_card: BTreeMap<String, BTreeMap<String, Section>> = BTreeMap::new();
        for record in records {
            let (uuid, key, section) = record.into_parts();
            by_card.entry(uuid).or_default().insert(key, section);
        }
        Ok(by_card)
    }

    /// Attaches each card's sections and converts the rows into domain cards.
    async fn hydrate(&self, records: Vec<CardRecord>) -> PortResult<Vec<Card>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let uuids = records.iter().map(|r| r.uuid.clone()).collect();
        let mut sections = self.load_sections(uuids).await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let own = sections.remove(&r.uuid).unwrap_or_default();
                r.into_domain(own)
            })
            .collect())
    }

    async fn fetch_cards(&self, mut qb: QueryBuilder<'_, Postgres>) -> PortResult<Vec<Card>> {
        let records = qb
            .build_query_as::<CardRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(port_error)?;
        self.hydrate(records).await
    }
}

/// Reads one card and its sections on an open connection, so a transaction
/// sees its own uncommitted writes.
async fn load_card(conn: &mut PgConnection, uuid: &str) -> PortResult<Option<Card>> {
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(CARD_COLUMNS);
    qb.push(" WHERE c.uuid = ").push_bind(uuid.to_string());
    let record = qb
        .build_query_as::<CardRecord>()
        .fetch_optional(&mut *conn)
        .await
        .map_err(port_error)?;
    let Some(record) = record else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, SectionRecord>(
        "SELECT card_uuid, section_key, title, content, model_used, generated_at \
         FROM card_sections WHERE card_uuid = $1",
    )
    .bind(uuid)
    .fetch_all(&mut *conn)
    .await
    .map_err(port_error)?;
    let sections = rows
        .into_iter()
        .map(|r| {
            let (_, key, section) = r.into_parts();
            (key, section)
        })
        .collect();
    Ok(Some(record.into_domain(sections)))
}

fn port_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .map(|code| code == "23503")
        .unwrap_or(false)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const CARD_COLUMNS: &str = "SELECT c.uuid, c.attributes, c.publication_status, c.legacy_long_form, \
     c.guide_content, c.analysis_status, c.model_used, c.analyzed_at, c.guide_version FROM cards c";

#[derive(FromRow)]
struct CardRecord {
    uuid: String,
    attributes: Json<CardAttributes>,
    publication_status: String,
    legacy_long_form: Option<String>,
    guide_content: Option<String>,
    analysis_status: Option<Json<AnalysisStatus>>,
    model_used: Option<String>,
    analyzed_at: Option<DateTime<Utc>>,
    guide_version: Option<String>,
}

impl CardRecord {
    /// Sectioned rows win over the legacy blob; a card with neither and no
    /// analysis metadata has no guide at all.
    fn into_domain(self, sections: BTreeMap<String, Section>) -> Card {
        let has_guide = !sections.is_empty()
            || self.legacy_long_form.is_some()
            || self.guide_content.is_some()
            || self.analysis_status.is_some()
            || self.model_used.is_some();

        let analysis = if has_guide {
            let body = match self.legacy_long_form {
                Some(long_form) if sections.is_empty() && self.guide_content.is_none() => {
                    GuideBody::Legacy { long_form }
                }
                _ => GuideBody::Sectioned {
                    sections,
                    content: self.guide_content,
                },
            };
            Some(Analysis {
                body,
                status: self
                    .analysis_status
                    .map(|s| s.0)
                    .unwrap_or(AnalysisStatus::NotStarted),
                model_used: self.model_used,
                analyzed_at: self.analyzed_at,
                guide_version: self.guide_version,
            })
        } else {
            None
        };

        Card {
            uuid: self.uuid,
            attributes: self.attributes.0,
            analysis,
            status: PublicationStatus::parse(&self.publication_status),
        }
    }
}

#[derive(FromRow)]
struct SectionRecord {
    card_uuid: String,
    section_key: String,
    title: String,
    content: String,
    model_used: String,
    generated_at: DateTime<Utc>,
}

impl SectionRecord {
    fn into_parts(self) -> (String, String, Section) {
        (
            self.card_uuid,
            self.section_key,
            Section {
                title: self.title,
                content: self.content,
                model_used: self.model_used,
                generated_at: self.generated_at,
            },
        )
    }
}

#[derive(FromRow)]
struct PriorityRecord {
    name: String,
    uuid: String,
    reason: String,
    priority_order: i64,
    added_at: DateTime<Utc>,
    processed: bool,
}

impl PriorityRecord {
    fn to_domain(self) -> PriorityEntry {
        PriorityEntry {
            name: self.name,
            uuid: self.uuid,
            reason: self.reason,
            priority_order: self.priority_order,
            added_at: self.added_at,
            processed: self.processed,
        }
    }
}

#[derive(FromRow)]
struct MentionRecord {
    uuid: String,
    card_name: String,
    mention_count: i64,
    last_mentioned: DateTime<Utc>,
    last_mentioned_in: Option<String>,
}

impl MentionRecord {
    fn to_domain(self) -> MentionEntry {
        MentionEntry {
            uuid: self.uuid,
            card_name: self.card_name,
            mention_count: self.mention_count,
            last_mentioned: self.last_mentioned,
            last_mentioned_in: self.last_mentioned_in,
        }
    }
}

//=========================================================================================
// Query Building
//=========================================================================================

const HAS_GUIDE_SQL: &str = "(c.legacy_long_form IS NOT NULL OR c.guide_content IS NOT NULL \
     OR c.analysis_status IS NOT NULL OR c.model_used IS NOT NULL \
     OR EXISTS (SELECT 1 FROM card_sections g WHERE g.card_uuid = c.uuid))";

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &CardFilter) {
    qb.push(" WHERE TRUE");
    if let Some(lang) = &filter.lang {
        qb.push(" AND c.lang = ").push_bind(lang.clone());
    }
    if let Some(requirement) = &filter.incomplete_for {
        qb.push(
            " AND (SELECT COUNT(*) FROM card_sections s \
             WHERE s.card_uuid = c.uuid AND s.section_key = ANY(",
        )
        .push_bind(requirement.keys.clone())
        .push(")) < ")
        .push_bind(requirement.required as i64);
    }
    match filter.ranked {
        Some(true) => {
            qb.push(" AND c.popularity_rank IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND c.popularity_rank IS NULL");
        }
        None => {}
    }
    match filter.has_guide {
        Some(true) => {
            qb.push(" AND ").push(HAS_GUIDE_SQL);
        }
        Some(false) => {
            qb.push(" AND NOT ").push(HAS_GUIDE_SQL);
        }
        None => {}
    }
}

fn push_sort(qb: &mut QueryBuilder<'_, Postgres>, sort: CardSort) {
    match sort {
        CardSort::Popularity => qb.push(
            " ORDER BY c.popularity_rank ASC NULLS LAST, c.released_at ASC NULLS LAST, \
             c.name ASC, c.uuid ASC",
        ),
        CardSort::Name => qb.push(" ORDER BY lower(c.name) ASC, c.uuid ASC"),
    };
}

const UPSERT_SECTION: &str = "INSERT INTO card_sections \
     (card_uuid, section_key, title, content, model_used, generated_at) \
     VALUES ($1, $2, $3, $4, $5, $6) \
     ON CONFLICT (card_uuid, section_key) DO UPDATE SET title = EXCLUDED.title, \
     content = EXCLUDED.content, model_used = EXCLUDED.model_used, \
     generated_at = EXCLUDED.generated_at";

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_section<'q>(
    query: PgQuery<'q>,
    uuid: &'q str,
    key: &'q str,
    section: &'q Section,
) -> PgQuery<'q> {
    query
        .bind(uuid)
        .bind(key)
        .bind(&section.title)
        .bind(&section.content)
        .bind(&section.model_used)
        .bind(section.generated_at)
}

fn section_error(e: sqlx::Error, uuid: &str) -> PortError {
    if is_foreign_key_violation(&e) {
        PortError::NotFound(format!("Card {} not found", uuid))
    } else {
        port_error(e)
    }
}

/// `UPDATE cards` writing only the `Some` fields.
fn fields_update(uuid: &str, fields: CardFields) -> QueryBuilder<'static, Postgres> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE cards SET ");
    {
        let mut set = qb.separated(", ");
        set.push("uuid = uuid");
        if let Some(status) = fields.status {
            set.push("publication_status = ")
                .push_bind_unseparated(status.as_str());
        }
        if let Some(status) = fields.analysis_status {
            set.push("analysis_status = ").push_bind_unseparated(Json(status));
        }
        if let Some(content) = fields.content {
            set.push("guide_content = ").push_bind_unseparated(content);
        }
        if let Some(model_used) = fields.model_used {
            set.push("model_used = ").push_bind_unseparated(model_used);
        }
        if let Some(analyzed_at) = fields.analyzed_at {
            set.push("analyzed_at = ").push_bind_unseparated(analyzed_at);
        }
        if let Some(guide_version) = fields.guide_version {
            set.push("guide_version = ").push_bind_unseparated(guide_version);
        }
    }
    qb.push(" WHERE uuid = ").push_bind(uuid.to_string());
    qb
}

//=========================================================================================
// `CardStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CardStore for DbAdapter {
    async fn find_card(&self, uuid: &str) -> PortResult<Option<Card>> {
        let mut qb = QueryBuilder::new(CARD_COLUMNS);
        qb.push(" WHERE c.uuid = ").push_bind(uuid.to_string());
        Ok(self.fetch_cards(qb).await?.into_iter().next())
    }

    async fn find_card_by_name(&self, name: &str, filter: &CardFilter) -> PortResult<Option<Card>> {
        let mut qb = QueryBuilder::new(CARD_COLUMNS);
        push_filter(&mut qb, filter);
        qb.push(" AND lower(c.name) = lower(")
            .push_bind(name.trim().to_string())
            .push(")");
        push_sort(&mut qb, CardSort::Popularity);
        qb.push(" LIMIT 1");
        Ok(self.fetch_cards(qb).await?.into_iter().next())
    }

    async fn upsert_card(&self, card: &Card) -> PortResult<()> {
        let legacy = match card.analysis.as_ref().map(|a| &a.body) {
            Some(GuideBody::Legacy { long_form }) => Some(long_form.clone()),
            _ => None,
        };
        let attrs = &card.attributes;
        sqlx::query(
            "INSERT INTO cards (uuid, name, lang, popularity_rank, released_at, attributes, \
             publication_status, legacy_long_form) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (uuid) DO UPDATE SET name = EXCLUDED.name, lang = EXCLUDED.lang, \
             popularity_rank = EXCLUDED.popularity_rank, released_at = EXCLUDED.released_at, \
             attributes = EXCLUDED.attributes, \
             legacy_long_form = COALESCE(EXCLUDED.legacy_long_form, cards.legacy_long_form)",
        )
        .bind(&card.uuid)
        .bind(&attrs.name)
        .bind(&attrs.lang)
        .bind(attrs.popularity_rank)
        .bind(attrs.released_at)
        .bind(Json(attrs))
        .bind(card.status.as_str())
        .bind(legacy)
        .execute(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(())
    }

    async fn upsert_card_fields(&self, uuid: &str, fields: CardFields) -> PortResult<()> {
        let result = fields_update(uuid, fields)
            .build()
            .execute(&self.pool)
            .await
            .map_err(port_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Card {} not found", uuid)));
        }
        Ok(())
    }

    async fn put_section(&self, uuid: &str, key: &str, section: &Section) -> PortResult<()> {
        bind_section(sqlx::query(UPSERT_SECTION), uuid, key, section)
            .execute(&self.pool)
            .await
            .map_err(|e| section_error(e, uuid))?;
        Ok(())
    }

    async fn put_section_and_refresh(
        &self,
        uuid: &str,
        key: &str,
        section: &Section,
        refresh: &SectionRefresh<'_>,
    ) -> PortResult<Card> {
        let mut tx = self.pool.begin().await.map_err(port_error)?;

        // Row lock on the card serializes every refresh for it.
        let locked: Option<String> =
            sqlx::query_scalar("SELECT uuid FROM cards WHERE uuid = $1 FOR UPDATE")
                .bind(uuid)
                .fetch_optional(&mut *tx)
                .await
                .map_err(port_error)?;
        if locked.is_none() {
            return Err(PortError::NotFound(format!("Card {} not found", uuid)));
        }

        bind_section(sqlx::query(UPSERT_SECTION), uuid, key, section)
            .execute(&mut *tx)
            .await
            .map_err(|e| section_error(e, uuid))?;

        let stored = load_card(&mut *tx, uuid)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Card {} not found", uuid)))?;
        fields_update(uuid, refresh(&stored))
            .build()
            .execute(&mut *tx)
            .await
            .map_err(port_error)?;
        let written = load_card(&mut *tx, uuid)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Card {} not found", uuid)))?;

        tx.commit().await.map_err(port_error)?;
        Ok(written)
    }

    async fn scan_cards(
        &self,
        filter: &CardFilter,
        sort: CardSort,
        limit: usize,
    ) -> PortResult<Vec<Card>> {
        let mut qb = QueryBuilder::new(CARD_COLUMNS);
        push_filter(&mut qb, filter);
        push_sort(&mut qb, sort);
        qb.push(" LIMIT ").push_bind(limit as i64);
        self.fetch_cards(qb).await
    }

    async fn scan_cards_after(
        &self,
        filter: &CardFilter,
        after: Option<&NameCursor>,
        limit: usize,
    ) -> PortResult<Vec<Card>> {
        let mut qb = QueryBuilder::new(CARD_COLUMNS);
        push_filter(&mut qb, filter);
        if let Some(cursor) = after {
            qb.push(" AND (lower(c.name), c.uuid) > (lower(")
                .push_bind(cursor.name.clone())
                .push("), ")
                .push_bind(cursor.uuid.clone())
                .push(")");
        }
        push_sort(&mut qb, CardSort::Name);
        qb.push(" LIMIT ").push_bind(limit as i64);
        self.fetch_cards(qb).await
    }

    async fn sample_card(&self, filter: &CardFilter) -> PortResult<Option<Card>> {
        let mut qb = QueryBuilder::new(CARD_COLUMNS);
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY random() LIMIT 1");
        Ok(self.fetch_cards(qb).await?.into_iter().next())
    }

    async fn count_cards(&self, filter: &CardFilter) -> PortResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM cards c");
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await.map_err(port_error)?;
        let count: i64 = row.try_get(0).map_err(port_error)?;
        Ok(count.max(0) as u64)
    }
}

//=========================================================================================
// `PriorityQueueStore` Trait Implementation
//=========================================================================================

const INSERT_ACTIVE_ENTRY: &str = "INSERT INTO priority_queue (name, uuid, reason, priority_order) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (lower(name)) WHERE NOT processed DO NOTHING";

#[async_trait]
impl PriorityQueueStore for DbAdapter {
    async fn replace_active(&self, requests: &[PriorityRequest]) -> PortResult<usize> {
        let mut tx = self.pool.begin().await.map_err(port_error)?;
        sqlx::query("DELETE FROM priority_queue WHERE NOT processed")
            .execute(&mut *tx)
            .await
            .map_err(port_error)?;

        let mut added = 0usize;
        for request in requests {
            let result = sqlx::query(INSERT_ACTIVE_ENTRY)
                .bind(&request.name)
                .bind(&request.uuid)
                .bind(&request.reason)
                .bind((added + 1) as i64)
                .execute(&mut *tx)
                .await
                .map_err(port_error)?;
            if result.rows_affected() > 0 {
                added += 1;
            }
        }

        tx.commit().await.map_err(port_error)?;
        Ok(added)
    }

    async fn enqueue(&self, request: &PriorityRequest) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO priority_queue (name, uuid, reason, priority_order) \
             SELECT $1, $2, $3, COALESCE(MAX(priority_order), 0) + 1 \
             FROM priority_queue WHERE NOT processed \
             ON CONFLICT (lower(name)) WHERE NOT processed DO NOTHING",
        )
        .bind(&request.name)
        .bind(&request.uuid)
        .bind(&request.reason)
        .execute(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending(&self, limit: usize) -> PortResult<Vec<PriorityEntry>> {
        let records = sqlx::query_as::<_, PriorityRecord>(
            "SELECT name, uuid, reason, priority_order, added_at, processed \
             FROM priority_queue WHERE NOT processed \
             ORDER BY priority_order ASC, added_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn mark_processed(&self, name: &str) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE priority_queue SET processed = TRUE \
             WHERE NOT processed AND lower(name) = lower($1)",
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> PortResult<PriorityCounts> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE processed) AS processed \
             FROM priority_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(port_error)?;
        let total: i64 = row.try_get("total").map_err(port_error)?;
        let processed: i64 = row.try_get("processed").map_err(port_error)?;
        Ok(PriorityCounts {
            total: total.max(0) as u64,
            processed: processed.max(0) as u64,
        })
    }
}

//=========================================================================================
// `MentionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MentionStore for DbAdapter {
    async fn increment(&self, uuid: &str, card_name: &str, mentioned_in: &str) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO mention_histogram (uuid, card_name, mention_count, last_mentioned, last_mentioned_in) \
             VALUES ($1, $2, 1, NOW(), $3) \
             ON CONFLICT (uuid) DO UPDATE SET \
             mention_count = mention_histogram.mention_count + 1, \
             card_name = EXCLUDED.card_name, \
             last_mentioned = EXCLUDED.last_mentioned, \
             last_mentioned_in = EXCLUDED.last_mentioned_in \
             RETURNING mention_count",
        )
        .bind(uuid)
        .bind(card_name)
        .bind(mentioned_in)
        .fetch_one(&self.pool)
        .await
        .map_err(port_error)
    }

    async fn most_mentioned(&self, filter: &CardFilter) -> PortResult<Option<MentionEntry>> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT m.uuid, m.card_name, m.mention_count, m.last_mentioned, m.last_mentioned_in \
             FROM mention_histogram m JOIN cards c ON c.uuid = m.uuid",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY m.mention_count DESC, m.last_mentioned DESC, m.uuid ASC LIMIT 1");
        let record = qb
            .build_query_as::<MentionRecord>()
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn get_mention(&self, uuid: &str) -> PortResult<Option<MentionEntry>> {
        let record = sqlx::query_as::<_, MentionRecord>(
            "SELECT uuid, card_name, mention_count, last_mentioned, last_mentioned_in \
             FROM mention_histogram WHERE uuid = $1",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(port_error)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn count_entries(&self) -> PortResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mention_histogram")
            .fetch_one(&self.pool)
            .await
            .map_err(port_error)?;
        Ok(count.max(0) as u64)
    }
}
