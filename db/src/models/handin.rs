//! Handin records: one row per accepted submission, kept forever.
//!
//! A row is inserted once by the intake service with `state = pending` and the
//! deadline tier that was active at acceptance. Afterwards only the state,
//! result and score columns change, and only through the compare-and-set
//! helpers below, which refuse to move a record out of a terminal state.

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::{ConnectionTrait, PaginatorTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "handins")]
pub struct Model {
    /// Globally unique handin identifier, allocated at acceptance.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Submitting user (weak reference).
    pub owner_id: i64,
    /// Assignment uuid (weak reference into the homework catalog).
    pub assignment_id: String,
    /// Assignment slug at acceptance, kept for display.
    pub assignment_slug: String,
    /// Language key chosen at submission time.
    pub language: String,
    /// Deadline instant of the tier frozen at acceptance.
    pub tier_deadline: DateTime<Utc>,
    /// Credit multiplier of the tier frozen at acceptance.
    pub tier_scale: f64,
    /// Opaque handle to the packaged artifact.
    pub artifact_ref: String,
    pub state: HandinState,
    /// Grading outcome, present only in terminal states.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub result: Option<Json>,
    /// Raw score reported by the grader.
    pub score: Option<f64>,
    /// `score * tier_scale`.
    pub final_score: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a handin.
///
/// `pending -> grading -> {graded, failed, stale}`, with `pending` allowed to
/// jump straight to any terminal state. Terminal states never change.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum HandinState {
    /// Accepted, waiting for a worker.
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Claimed by a worker.
    #[sea_orm(string_value = "grading")]
    Grading,
    /// Grading finished, result attached.
    #[sea_orm(string_value = "graded")]
    Graded,
    /// Grading could not complete.
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Superseded, e.g. the assignment was removed.
    #[sea_orm(string_value = "stale")]
    Stale,
}

impl Default for HandinState {
    fn default() -> Self {
        Self::Pending
    }
}

impl HandinState {
    /// States a record can still leave.
    pub const OPEN: [HandinState; 2] = [HandinState::Pending, HandinState::Grading];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Graded | Self::Failed | Self::Stale)
    }

    pub fn can_transition_to(self, next: HandinState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Grading) => true,
            (Self::Pending | Self::Grading, n) => n.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::dispatch_outbox::Entity")]
    DispatchOutbox,
}

impl Related<super::dispatch_outbox::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DispatchOutbox.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Everything the intake service decides before a handin is written.
#[derive(Debug, Clone)]
pub struct NewHandin {
    pub id: String,
    pub owner_id: i64,
    pub assignment_id: String,
    pub assignment_slug: String,
    pub language: String,
    pub tier_deadline: DateTime<Utc>,
    pub tier_scale: f64,
    pub artifact_ref: String,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal write applied by the correlator.
#[derive(Debug, Clone)]
pub struct Completion {
    pub state: HandinState,
    pub result: Json,
    pub score: Option<f64>,
    pub final_score: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

impl Model {
    /// Inserts a new `pending` handin. Fails if the id already exists.
    pub async fn create<C: ConnectionTrait>(db: &C, new: NewHandin) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(new.id),
            owner_id: Set(new.owner_id),
            assignment_id: Set(new.assignment_id),
            assignment_slug: Set(new.assignment_slug),
            language: Set(new.language),
            tier_deadline: Set(new.tier_deadline),
            tier_scale: Set(new.tier_scale),
            artifact_ref: Set(new.artifact_ref),
            state: Set(HandinState::Pending),
            result: Set(None),
            score: Set(None),
            final_score: Set(None),
            submitted_at: Set(new.submitted_at),
            updated_at: Set(new.submitted_at),
            completed_at: Set(None),
        }
        .insert(db)
        .await
    }

    /// The `(deadline, scale)` pair captured at acceptance.
    pub fn accepted_tier(&self) -> (DateTime<Utc>, f64) {
        (self.tier_deadline, self.tier_scale)
    }
}

impl Entity {
    /// All handins of one user, newest first.
    pub async fn find_by_owner<C: ConnectionTrait>(
        db: &C,
        owner_id: i64,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .order_by_desc(Column::SubmittedAt)
            .all(db)
            .await
    }

    /// All handins for one assignment, newest first.
    pub async fn find_by_assignment<C: ConnectionTrait>(
        db: &C,
        assignment_id: &str,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AssignmentId.eq(assignment_id))
            .order_by_desc(Column::SubmittedAt)
            .all(db)
            .await
    }

    /// `pending -> grading`. Returns whether this call made the transition.
    pub async fn claim<C: ConnectionTrait>(
        db: &C,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let res = Entity::update_many()
            .set(ActiveModel {
                state: Set(HandinState::Grading),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(Column::Id.eq(id))
            .filter(Column::State.eq(HandinState::Pending))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Moves an open handin into a terminal state.
    ///
    /// The state filter makes this a compare-and-set: of several concurrent
    /// completions for the same id, exactly one observes `true`.
    pub async fn complete<C: ConnectionTrait>(
        db: &C,
        id: &str,
        completion: Completion,
    ) -> Result<bool, DbErr> {
        if !completion.state.is_terminal() {
            return Err(DbErr::Custom(format!(
                "{} is not a terminal handin state",
                completion.state
            )));
        }

        let res = Entity::update_many()
            .set(ActiveModel {
                state: Set(completion.state),
                result: Set(Some(completion.result)),
                score: Set(completion.score),
                final_score: Set(completion.final_score),
                completed_at: Set(Some(completion.completed_at)),
                updated_at: Set(completion.completed_at),
                ..Default::default()
            })
            .filter(Column::Id.eq(id))
            .filter(Column::State.is_in(HandinState::OPEN))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Marks every open handin of an assignment as `stale`.
    pub async fn retire_assignment<C: ConnectionTrait>(
        db: &C,
        assignment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let res = Entity::update_many()
            .set(ActiveModel {
                state: Set(HandinState::Stale),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(Column::AssignmentId.eq(assignment_id))
            .filter(Column::State.is_in(HandinState::OPEN))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Open handins whose assignment is not in `live`.
    pub async fn count_open_except<C: ConnectionTrait>(
        db: &C,
        live: Vec<String>,
    ) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::AssignmentId.is_not_in(live))
            .filter(Column::State.is_in(HandinState::OPEN))
            .count(db)
            .await
    }

    /// Marks every open handin whose assignment is not in `live` as `stale`.
    pub async fn retire_all_except<C: ConnectionTrait>(
        db: &C,
        live: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let res = Entity::update_many()
            .set(ActiveModel {
                state: Set(HandinState::Stale),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(Column::AssignmentId.is_not_in(live))
            .filter(Column::State.is_in(HandinState::OPEN))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
