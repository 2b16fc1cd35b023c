//! Matches grading results back to their handins.
//!
//! Every write is a compare-and-set on the handin state, so duplicate or
//! concurrent deliveries of the same result leave exactly one terminal write.
//! Results for unknown ids are logged and dropped.

use chrono::{DateTime, Utc};
use db::models::handin::{Completion, Entity as Handin, HandinState};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::AssignmentCatalog;
use crate::clock::{Clock, SystemClock};
use crate::ids::HandinId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Graded,
    Failed,
}

/// What a worker reports for one handin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub status: OutcomeStatus,
    /// Raw score before the deadline scale is applied.
    #[serde(default)]
    pub score: Option<f64>,
    /// One-line summary shown to the student.
    #[serde(default)]
    pub brief: String,
    /// Full grader output (test logs, feedback).
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl GradeOutcome {
    pub fn graded(score: f64, brief: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Graded,
            score: Some(score),
            brief: brief.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn failed(brief: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            score: None,
            brief: brief.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    fn terminal_state(&self) -> HandinState {
        match self.status {
            OutcomeStatus::Graded => HandinState::Graded,
            OutcomeStatus::Failed => HandinState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub handin_id: HandinId,
    pub outcome: GradeOutcome,
    pub completed_at: DateTime<Utc>,
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Correlation {
    /// This delivery changed the record.
    Applied,
    /// The record had already moved on. Nothing changed.
    Duplicate,
    /// No handin with that id.
    Orphan,
}

#[derive(Clone)]
pub struct ResultCorrelator {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl ResultCorrelator {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A worker picked the job up: `pending -> grading`.
    pub async fn on_claim(&self, handin_id: &HandinId) -> Result<Correlation, DbErr> {
        if Handin::claim(&self.db, handin_id.as_str(), self.clock.now()).await? {
            tracing::info!(handin_id = %handin_id, "handin claimed");
            return Ok(Correlation::Applied);
        }

        match Handin::find_by_id(handin_id.as_str()).one(&self.db).await? {
            None => {
                tracing::warn!(handin_id = %handin_id, "claim for unknown handin");
                Ok(Correlation::Orphan)
            }
            Some(record) => {
                tracing::debug!(handin_id = %handin_id, state = %record.state, "claim ignored");
                Ok(Correlation::Duplicate)
            }
        }
    }

    /// Applies a grading result. Safe to call any number of times for the
    /// same handin.
    pub async fn on_result(&self, message: &ResultMessage) -> Result<Correlation, DbErr> {
        let handin_id = &message.handin_id;

        let Some(record) = Handin::find_by_id(handin_id.as_str()).one(&self.db).await? else {
            tracing::warn!(handin_id = %handin_id, "result for unknown handin dropped");
            return Ok(Correlation::Orphan);
        };
        if record.state.is_terminal() {
            tracing::debug!(handin_id = %handin_id, state = %record.state, "duplicate result ignored");
            return Ok(Correlation::Duplicate);
        }

        let outcome = &message.outcome;
        let score = outcome.score.filter(|s| s.is_finite());
        // Scale frozen at acceptance, never the live schedule.
        let final_score = score.map(|s| s * record.tier_scale);
        let result =
            serde_json::to_value(outcome).map_err(|e| DbErr::Custom(e.to_string()))?;

        let applied = Handin::complete(
            &self.db,
            handin_id.as_str(),
            Completion {
                state: outcome.terminal_state(),
                result,
                score,
                final_score,
                completed_at: message.completed_at,
            },
        )
        .await?;

        if applied {
            tracing::info!(
                handin_id = %handin_id,
                status = ?outcome.status,
                score = ?score,
                final_score = ?final_score,
                "handin result recorded"
            );
            Ok(Correlation::Applied)
        } else {
            tracing::debug!(handin_id = %handin_id, "lost race to a concurrent result");
            Ok(Correlation::Duplicate)
        }
    }

    /// Moves open handins of a removed assignment to `stale`.
    pub async fn retire_assignment(&self, assignment_uuid: &str) -> Result<u64, DbErr> {
        let retired = Handin::retire_assignment(&self.db, assignment_uuid, self.clock.now()).await?;
        if retired > 0 {
            tracing::info!(assignment = %assignment_uuid, retired, "handins marked stale");
        }
        Ok(retired)
    }

    /// Moves open handins of every assignment missing from `catalog` to
    /// `stale`.
    ///
    /// An empty catalog retires nothing: it is far more likely to be a bad
    /// catalog file than a course with no assignments left.
    pub async fn retire_removed(&self, catalog: &AssignmentCatalog) -> Result<u64, DbErr> {
        if catalog.is_empty() {
            tracing::warn!("catalog is empty, not retiring any handins");
            return Ok(0);
        }

        let pending = Handin::count_open_except(&self.db, catalog.uuids()).await?;
        if pending == 0 {
            return Ok(0);
        }
        tracing::warn!(
            handins = pending,
            assignments = catalog.len(),
            "retiring open handins of assignments missing from the catalog"
        );

        let retired = Handin::retire_all_except(&self.db, catalog.uuids(), self.clock.now()).await?;
        tracing::info!(retired, "handins of removed assignments marked stale");
        Ok(retired)
    }

    /// Applies results from an in-process channel until it closes or `token`
    /// is cancelled.
    pub async fn consume(&self, mut results: mpsc::Receiver<ResultMessage>, token: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                next = results.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            if let Err(e) = self.on_result(&message).await {
                tracing::error!(
                    handin_id = %message.handin_id,
                    error = %e,
                    "failed to apply result"
                );
            }
        }
        tracing::debug!("result consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_format() {
        let outcome: GradeOutcome = serde_json::from_value(serde_json::json!({
            "status": "graded",
            "score": 87.5
        }))
        .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Graded);
        assert_eq!(outcome.score, Some(87.5));
        assert_eq!(outcome.brief, "");
        assert_eq!(outcome.terminal_state(), HandinState::Graded);

        assert_eq!(GradeOutcome::failed("boom").terminal_state(), HandinState::Failed);
    }
}
