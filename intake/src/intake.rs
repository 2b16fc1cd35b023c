//! The submission path.
//!
//! `submit` runs in a fixed order: resolve the deadline tier, pick the
//! language handler, validate the upload, allocate an id, then store the
//! handin and its outbox row in one transaction. Only then is the job
//! published. Anything that fails before the commit leaves no trace; anything
//! that fails after it is the outbox relay's problem, not the caller's.
//!
//! The persist timeout bounds the work up to the commit and not the commit
//! itself. A commit is either reported as done or as failed, never as
//! "timed out but maybe stored".

use chrono::{DateTime, Utc};
use db::models::dispatch_outbox;
use db::models::handin::{self, NewHandin};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::ArtifactStore;
use crate::catalog::{Assignment, AssignmentCatalog};
use crate::clock::{Clock, SystemClock};
use crate::deadline::{DeadlineResolver, DeadlineTier};
use crate::dispatch::{AssignmentContext, DispatchMessage, OutboxRelay, Routing};
use crate::error::{IntakeError, PersistenceError};
use crate::ids::{HandinId, HandinIdGenerator, UuidGenerator};
use crate::languages::{LanguageRegistry, PackagedArtifact, RawPayload};

/// One upload as handed over by the web tier.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub owner_id: i64,
    /// Assignment slug or uuid.
    pub assignment: String,
    pub language: String,
    pub payload: RawPayload,
    /// Deadline the upload form showed the user. Informational only.
    pub deadline_hint: Option<DateTime<Utc>>,
}

impl SubmitRequest {
    pub fn new(
        owner_id: i64,
        assignment: impl Into<String>,
        language: impl Into<String>,
        payload: RawPayload,
    ) -> Self {
        Self {
            owner_id,
            assignment: assignment.into(),
            language: language.into(),
            payload,
            deadline_hint: None,
        }
    }

    pub fn with_deadline_hint(mut self, hint: DateTime<Utc>) -> Self {
        self.deadline_hint = Some(hint);
        self
    }
}

#[derive(Clone)]
pub struct SubmissionIntake {
    db: DatabaseConnection,
    catalog: Arc<AssignmentCatalog>,
    languages: Arc<LanguageRegistry>,
    store: ArtifactStore,
    relay: OutboxRelay,
    routing: Routing,
    ids: Arc<dyn HandinIdGenerator>,
    clock: Arc<dyn Clock>,
    resolver: DeadlineResolver,
    persist_timeout: Duration,
}

impl SubmissionIntake {
    pub fn new(
        db: DatabaseConnection,
        catalog: Arc<AssignmentCatalog>,
        languages: Arc<LanguageRegistry>,
        store: ArtifactStore,
        relay: OutboxRelay,
        routing: Routing,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            db,
            catalog,
            languages,
            store,
            relay,
            routing,
            ids: Arc::new(UuidGenerator),
            resolver: DeadlineResolver::new(clock.clone()),
            clock,
            persist_timeout: Duration::from_secs(5),
        }
    }

    /// Wires the artifact root, queue routing and persist timeout from
    /// `cfg`.
    pub fn from_config(
        cfg: &common::AppConfig,
        db: DatabaseConnection,
        catalog: Arc<AssignmentCatalog>,
        languages: Arc<LanguageRegistry>,
        relay: OutboxRelay,
    ) -> Self {
        Self::new(
            db,
            catalog,
            languages,
            ArtifactStore::from_config(cfg),
            relay,
            Routing::from_config(cfg),
        )
        .with_persist_timeout(Duration::from_millis(cfg.persist_timeout_ms))
    }

    pub fn with_ids(mut self, ids: Arc<dyn HandinIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Replaces the clock used for deadline resolution, timestamps and the
    /// immediate publish.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.resolver = DeadlineResolver::new(clock.clone());
        self.relay = self.relay.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &AssignmentCatalog {
        &self.catalog
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn persist_timeout(&self) -> Duration {
        self.persist_timeout
    }

    pub async fn submit(&self, req: SubmitRequest) -> Result<HandinId, IntakeError> {
        let assignment = self
            .catalog
            .get_by_slug(&req.assignment)
            .or_else(|| self.catalog.get_by_uuid(&req.assignment))
            .ok_or_else(|| IntakeError::AssignmentNotFound(req.assignment.clone()))?;

        // The tier is captured once, here, and never looked up again.
        let tier = self
            .resolver
            .resolve(assignment)
            .ok_or_else(|| IntakeError::SubmissionClosed {
                assignment: assignment.slug.clone(),
            })?;
        if let Some(hint) = req.deadline_hint {
            if hint != tier.due {
                tracing::debug!(
                    assignment = %assignment.slug,
                    hint = %hint,
                    resolved = %tier.due,
                    "client deadline hint differs from resolved tier"
                );
            }
        }

        let language = req.language.trim().to_lowercase();
        let handler = self
            .languages
            .get(&language)
            .filter(|_| assignment.supports(&language))
            .ok_or_else(|| IntakeError::UnsupportedLanguage {
                assignment: assignment.slug.clone(),
                language: language.clone(),
            })?;

        let artifact = handler.validate(&req.payload).inspect_err(|e| {
            tracing::info!(
                owner_id = req.owner_id,
                assignment = %assignment.slug,
                language = %language,
                reason = %e,
                "upload rejected"
            );
        })?;

        let id = self.ids.next_id();
        let accepted = Accepted {
            id: &id,
            owner_id: req.owner_id,
            assignment,
            language: &language,
            tier,
            artifact: &artifact,
            submitted_at: self.clock.now(),
        };

        let outbox_row = self.persist(accepted).await.inspect_err(|e| {
            tracing::error!(
                handin_id = %id,
                assignment = %assignment.slug,
                error = %e,
                "failed to store handin"
            );
        })?;

        tracing::info!(
            handin_id = %id,
            owner_id = req.owner_id,
            assignment = %assignment.slug,
            language = %language,
            tier_due = %tier.due,
            tier_scale = tier.scale,
            "handin accepted"
        );

        // Accepted from here on. A failed publish stays in the outbox.
        if let Err(e) = self.relay.publish_entry(&outbox_row).await {
            tracing::warn!(
                handin_id = %id,
                error = %e,
                "immediate dispatch bookkeeping failed, relay will retry"
            );
        }

        Ok(id)
    }

    async fn persist(
        &self,
        accepted: Accepted<'_>,
    ) -> Result<dispatch_outbox::Model, PersistenceError> {
        // Dropping the staged transaction on timeout rolls it back.
        let (txn, row) = tokio::time::timeout(self.persist_timeout, self.stage(accepted))
            .await
            .map_err(|_| PersistenceError::Timeout(self.persist_timeout))??;
        txn.commit().await?;
        Ok(row)
    }

    /// Stores the blob and inserts both rows, leaving the transaction open.
    async fn stage(
        &self,
        accepted: Accepted<'_>,
    ) -> Result<(DatabaseTransaction, dispatch_outbox::Model), PersistenceError> {
        let artifact_ref = self.store.put(accepted.artifact).await?;
        let channel = self.routing.channel_for(accepted.language);

        let message = DispatchMessage {
            handin_id: accepted.id.clone(),
            owner_id: accepted.owner_id,
            language: accepted.language.to_string(),
            artifact_ref: artifact_ref.clone(),
            assignment: AssignmentContext::new(accepted.assignment, accepted.tier),
            submitted_at: accepted.submitted_at,
        };
        let payload = serde_json::to_value(&message)?;

        let txn = self.db.begin().await?;
        handin::Model::create(
            &txn,
            NewHandin {
                id: accepted.id.to_string(),
                owner_id: accepted.owner_id,
                assignment_id: accepted.assignment.uuid.clone(),
                assignment_slug: accepted.assignment.slug.clone(),
                language: accepted.language.to_string(),
                tier_deadline: accepted.tier.due,
                tier_scale: accepted.tier.scale,
                artifact_ref: artifact_ref.to_string(),
                submitted_at: accepted.submitted_at,
            },
        )
        .await?;
        let row = dispatch_outbox::Model::enqueue(
            &txn,
            accepted.id.as_str(),
            channel,
            payload,
            accepted.submitted_at,
        )
        .await?;

        Ok((txn, row))
    }
}

/// What `submit` has decided by the time it writes.
struct Accepted<'a> {
    id: &'a HandinId,
    owner_id: i64,
    assignment: &'a Assignment,
    language: &'a str,
    tier: DeadlineTier,
    artifact: &'a PackagedArtifact,
    submitted_at: DateTime<Utc>,
}
