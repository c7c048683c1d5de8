//! Background refresh of the search index from the real-time source
//!
//! Each pass enumerates the live backend, skips copies that are already
//! current, and re-indexes the rest with party names taken from enrichment
//! so cross-backend dedup can match on them.

use crate::enricher::Enricher;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use integrity_common::config::SyncConfig;
use integrity_common::errors::Result;
use integrity_common::metrics;
use integrity_common::models::{Document, DocumentRef, SearchQuery};
use integrity_common::resilience::{retry_idempotent, RetryPolicy};
use integrity_search::{RegisteredBackend, SearchIndexConnector};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Counts from one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub purged: usize,
}

pub struct IndexSyncer {
    source: RegisteredBackend,
    index: Arc<SearchIndexConnector>,
    enricher: Arc<Enricher>,
    config: SyncConfig,
    retry: RetryPolicy,
}

impl IndexSyncer {
    pub fn new(
        source: RegisteredBackend,
        index: Arc<SearchIndexConnector>,
        enricher: Arc<Enricher>,
        config: SyncConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            index,
            enricher,
            config,
            retry,
        }
    }

    /// Copies synced more recently than this are not re-fetched
    fn refresh_after(&self) -> ChronoDuration {
        ChronoDuration::seconds((self.config.max_staleness_secs / 2) as i64)
    }

    /// Run one pass at the current time
    pub async fn sync_once(&self) -> Result<SyncReport> {
        self.sync_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(backend = %self.source.id()))]
    pub async fn sync_at(&self, now: DateTime<Utc>) -> Result<SyncReport> {
        let mut report = SyncReport {
            purged: self.index.purge_stale(now).await,
            ..Default::default()
        };

        let query = SearchQuery::new(self.config.query.clone(), self.config.batch_size);
        let listing = retry_idempotent(&self.retry, "sync_search", || {
            self.source.call("search", self.source.connector.search(&query))
        })
        .await?;

        for hit in listing.hits {
            report.scanned += 1;
            let meta = hit.document;

            if self.is_current(&meta, now).await {
                report.unchanged += 1;
                continue;
            }

            match self.refresh(meta.clone(), now).await {
                Ok(()) => report.refreshed += 1,
                Err(e) => {
                    warn!(document = %meta.id, error = %e, "Failed to sync document");
                    report.failed += 1;
                }
            }
        }

        metrics::record_sync(self.source.id().as_str(), report.refreshed);
        info!(
            scanned = report.scanned,
            refreshed = report.refreshed,
            unchanged = report.unchanged,
            failed = report.failed,
            purged = report.purged,
            "Sync pass complete"
        );
        Ok(report)
    }

    async fn is_current(&self, meta: &DocumentRef, now: DateTime<Utc>) -> bool {
        match self.index.synced_version(&meta.id.id).await {
            Some((version, synced_at)) => version >= meta.version && now - synced_at < self.refresh_after(),
            None => false,
        }
    }

    async fn refresh(&self, mut meta: DocumentRef, now: DateTime<Utc>) -> Result<()> {
        let content = retry_idempotent(&self.retry, "sync_fetch", || {
            self.source
                .call("fetch_content", self.source.connector.fetch_content(&meta.id, Some(meta.version)))
        })
        .await?;

        let document = Document::with_content(meta.clone(), content.clone());
        let entities = self.enricher.enrich(&document).await;
        for party in entities.party_names() {
            if !meta.parties.iter().any(|p| p.eq_ignore_ascii_case(&party)) {
                meta.parties.push(party);
            }
        }

        debug!(document = %meta.id, version = %meta.version, parties = meta.parties.len(), "Indexing document");
        self.index.upsert_at(meta, content, now).await
    }

    /// Run passes on the configured interval until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sync_once().await {
                    error!(error = %e, "Sync pass failed");
                }
            }
        })
    }
}
