//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the card, priority and mention ports.
//! Selected with `STORE_BACKEND=memory` for local runs and used throughout the
//! test suite. Every operation takes the single lock once, so each call is
//! atomic with respect to every other call, matching the per-statement
//! atomicity the Postgres adapter relies on.

use async_trait::async_trait;
use chrono::Utc;
use guide_core::ports::{
    CardFields, CardFilter, CardSort, CardStore, MentionStore, NameCursor, PortError, PortResult,
    PriorityCounts, PriorityQueueStore, PriorityRequest, SectionRefresh,
};
use guide_core::{Analysis, AnalysisStatus, Card, GuideBody, MentionEntry, PriorityEntry, Section};
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    cards: BTreeMap<String, Card>,
    priority: Vec<PriorityEntry>,
    mentions: HashMap<String, MentionEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cards(cards: impl IntoIterator<Item = Card>) -> Self {
        let cards = cards.into_iter().map(|c| (c.uuid.clone(), c)).collect();
        Self {
            inner: RwLock::new(Inner {
                cards,
                ..Inner::default()
            }),
        }
    }
}

/// Popularity order: ranked before unranked, then best rank, earliest release, name.
fn popularity_order(a: &Card, b: &Card) -> Ordering {
    let (x, y) = (&a.attributes, &b.attributes);
    x.popularity_rank
        .is_none()
        .cmp(&y.popularity_rank.is_none())
        .then(x.popularity_rank.cmp(&y.popularity_rank))
        .then(x.released_at.is_none().cmp(&y.released_at.is_none()))
        .then(x.released_at.cmp(&y.released_at))
        .then(x.name.cmp(&y.name))
        .then(a.uuid.cmp(&b.uuid))
}

fn name_order(a: &Card, b: &Card) -> Ordering {
    a.attributes
        .name
        .to_lowercase()
        .cmp(&b.attributes.name.to_lowercase())
        .then(a.uuid.cmp(&b.uuid))
}

fn empty_analysis() -> Analysis {
    Analysis {
        body: GuideBody::Sectioned {
            sections: BTreeMap::new(),
            content: None,
        },
        status: AnalysisStatus::NotStarted,
        model_used: None,
        analyzed_at: None,
        guide_version: None,
    }
}

fn card_mut<'a>(inner: &'a mut Inner, uuid: &str) -> PortResult<&'a mut Card> {
    inner
        .cards
        .get_mut(uuid)
        .ok_or_else(|| PortError::NotFound(format!("Card {} not found", uuid)))
}

/// Runs `edit` against the card's section map and assembled content. A
/// missing guide is created; a legacy body is replaced by a sectioned one.
fn edit_sectioned<F>(card: &mut Card, edit: F)
where
    F: FnOnce(&mut BTreeMap<String, Section>, &mut Option<String>),
{
    let analysis = card.analysis.get_or_insert_with(empty_analysis);
    if let GuideBody::Legacy { .. } = analysis.body {
        analysis.body = GuideBody::Sectioned {
            sections: BTreeMap::new(),
            content: None,
        };
    }
    if let GuideBody::Sectioned { sections, content } = &mut analysis.body {
        edit(sections, content);
    }
}

/// Writes the `Some` fields onto `card`. Analysis metadata creates an empty
/// sectioned guide when the card has none yet.
fn apply_fields(card: &mut Card, fields: CardFields) {
    if let Some(status) = fields.status {
        card.status = status;
    }
    let touches_analysis = fields.analysis_status.is_some()
        || fields.content.is_some()
        || fields.model_used.is_some()
        || fields.analyzed_at.is_some()
        || fields.guide_version.is_some();
    if !touches_analysis {
        return;
    }

    match fields.content {
        Some(text) => edit_sectioned(card, |_, content| *content = Some(text)),
        None => {
            card.analysis.get_or_insert_with(empty_analysis);
        }
    }
    if let Some(analysis) = card.analysis.as_mut() {
        if let Some(status) = fields.analysis_status {
            analysis.status = status;
        }
        if let Some(model_used) = fields.model_used {
            analysis.model_used = Some(model_used);
        }
        if let Some(analyzed_at) = fields.analyzed_at {
            analysis.analyzed_at = Some(analyzed_at);
        }
        if let Some(guide_version) = fields.guide_version {
            analysis.guide_version = Some(guide_version);
        }
    }
}

//=========================================================================================
// `CardStore` Implementation
//=========================================================================================

#[async_trait]
impl CardStore for MemoryStore {
    async fn find_card(&self, uuid: &str) -> PortResult<Option<Card>> {
        Ok(self.inner.read().await.cards.get(uuid).cloned())
    }

    async fn find_card_by_name(&self, name: &str, filter: &CardFilter) -> PortResult<Option<Card>> {
        let wanted = name.trim().to_lowercase();
        let inner = self.inner.read().await;
        Ok(inner
            .cards
            .values()
            .filter(|c| c.attributes.name.to_lowercase() == wanted && filter.matches(c))
            .min_by(|a, b| popularity_order(a, b))
            .cloned())
    }

    async fn upsert_card(&self, card: &Card) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        match inner.cards.get_mut(&card.uuid) {
            Some(existing) => existing.attributes = card.attributes.clone(),
            None => {
                inner.cards.insert(card.uuid.clone(), card.clone());
            }
        }
        Ok(())
    }

    async fn upsert_card_fields(&self, uuid: &str, fields: CardFields) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let card = card_mut(&mut inner, uuid)?;
        apply_fields(card, fields);
        Ok(())
    }

    async fn put_section(&self, uuid: &str, key: &str, section: &Section) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let card = card_mut(&mut inner, uuid)?;
        edit_sectioned(card, |sections, _| {
            sections.insert(key.to_string(), section.clone());
        });
        Ok(())
    }

    async fn put_section_and_refresh(
        &self,
        uuid: &str,
        key: &str,
        section: &Section,
        refresh: &SectionRefresh<'_>,
    ) -> PortResult<Card> {
        let mut inner = self.inner.write().await;
        let card = card_mut(&mut inner, uuid)?;
        edit_sectioned(card, |sections, _| {
            sections.insert(key.to_string(), section.clone());
        });
        let fields = refresh(&*card);
        apply_fields(card, fields);
        Ok(card.clone())
    }

    async fn scan_cards(
        &self,
        filter: &CardFilter,
        sort: CardSort,
        limit: usize,
    ) -> PortResult<Vec<Card>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Card> = inner.cards.values().filter(|c| filter.matches(c)).collect();
        match sort {
            CardSort::Popularity => matching.sort_by(|a, b| popularity_order(a, b)),
            CardSort::Name => matching.sort_by(|a, b| name_order(a, b)),
        }
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn scan_cards_after(
        &self,
        filter: &CardFilter,
        after: Option<&NameCursor>,
        limit: usize,
    ) -> PortResult<Vec<Card>> {
        let cursor = after.map(|c| (c.name.to_lowercase(), c.uuid.as_str()));
        let inner = self.inner.read().await;
        let mut matching: Vec<&Card> = inner
            .cards
            .values()
            .filter(|c| filter.matches(c))
            .filter(|c| {
                cursor.as_ref().map_or(true, |(name, uuid)| {
                    (c.attributes.name.to_lowercase().as_str(), c.uuid.as_str())
                        > (name.as_str(), *uuid)
                })
            })
            .collect();
        matching.sort_by(|a, b| name_order(a, b));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn sample_card(&self, filter: &CardFilter) -> PortResult<Option<Card>> {
        let inner = self.inner.read().await;
        let matching: Vec<&Card> = inner.cards.values().filter(|c| filter.matches(c)).collect();
        let picked = matching.choose(&mut rand::thread_rng()).map(|c| (*c).clone());
        Ok(picked)
    }

    async fn count_cards(&self, filter: &CardFilter) -> PortResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.cards.values().filter(|c| filter.matches(c)).count() as u64)
    }
}

//=========================================================================================
// `PriorityQueueStore` Implementation
//=========================================================================================

fn push_entry(queue: &mut Vec<PriorityEntry>, request: &PriorityRequest, order: i64) {
    queue.push(PriorityEntry {
        name: request.name.clone(),
        uuid: request.uuid.clone(),
        reason: request.reason.clone(),
        priority_order: order,
        added_at: Utc::now(),
        processed: false,
    });
}

fn is_active_name(entry: &PriorityEntry, name: &str) -> bool {
    !entry.processed && entry.name.to_lowercase() == name.to_lowercase()
}

#[async_trait]
impl PriorityQueueStore for MemoryStore {
    async fn replace_active(&self, requests: &[PriorityRequest]) -> PortResult<usize> {
        let mut inner = self.inner.write().await;
        inner.priority.retain(|e| e.processed);
        let mut added = 0;
        for request in requests {
            if inner.priority.iter().any(|e| is_active_name(e, &request.name)) {
                continue;
            }
            added += 1;
            push_entry(&mut inner.priority, request, added as i64);
        }
        Ok(added)
    }

    async fn enqueue(&self, request: &PriorityRequest) -> PortResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.priority.iter().any(|e| is_active_name(e, &request.name)) {
            return Ok(false);
        }
        let next = inner
            .priority
            .iter()
            .filter(|e| !e.processed)
            .map(|e| e.priority_order)
            .max()
            .unwrap_or(0)
            + 1;
        push_entry(&mut inner.priority, request, next);
        Ok(true)
    }

    async fn pending(&self, limit: usize) -> PortResult<Vec<PriorityEntry>> {
        let inner = self.inner.read().await;
        let mut active: Vec<&PriorityEntry> = inner.priority.iter().filter(|e| !e.processed).collect();
        active.sort_by(|a, b| {
            a.priority_order
                .cmp(&b.priority_order)
                .then(a.added_at.cmp(&b.added_at))
        });
        Ok(active.into_iter().take(limit).cloned().collect())
    }

    async fn mark_processed(&self, name: &str) -> PortResult<u64> {
        let mut inner = self.inner.write().await;
        let mut marked = 0;
        for entry in inner.priority.iter_mut().filter(|e| is_active_name(e, name)) {
            entry.processed = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn counts(&self) -> PortResult<PriorityCounts> {
        let inner = self.inner.read().await;
        Ok(PriorityCounts {
            total: inner.priority.len() as u64,
            processed: inner.priority.iter().filter(|e| e.processed).count() as u64,
        })
    }
}

//=========================================================================================
// `MentionStore` Implementation
//=========================================================================================

/// Highest count first, then the most recent mention.
fn mention_order(a: &MentionEntry, b: &MentionEntry) -> Ordering {
    b.mention_count
        .cmp(&a.mention_count)
        .then(b.last_mentioned.cmp(&a.last_mentioned))
        .then(a.uuid.cmp(&b.uuid))
}

#[async_trait]
impl MentionStore for MemoryStore {
    async fn increment(&self, uuid: &str, card_name: &str, mentioned_in: &str) -> PortResult<i64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let entry = inner
            .mentions
            .entry(uuid.to_string())
            .or_insert_with(|| MentionEntry {
                uuid: uuid.to_string(),
                card_name: card_name.to_string(),
                mention_count: 0,
                last_mentioned: now,
                last_mentioned_in: None,
            });
        entry.mention_count += 1;
        entry.card_name = card_name.to_string();
        entry.last_mentioned = now;
        entry.last_mentioned_in = Some(mentioned_in.to_string());
        Ok(entry.mention_count)
    }

    async fn most_mentioned(&self, filter: &CardFilter) -> PortResult<Option<MentionEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .mentions
            .values()
            .filter(|m| inner.cards.get(&m.uuid).is_some_and(|c| filter.matches(c)))
            .min_by(|a, b| mention_order(a, b))
            .cloned())
    }

    async fn get_mention(&self, uuid: &str) -> PortResult<Option<MentionEntry>> {
        Ok(self.inner.read().await.mentions.get(uuid).cloned())
    }

    async fn count_entries(&self) -> PortResult<u64> {
        Ok(self.inner.read().await.mentions.len() as u64)
    }
}
