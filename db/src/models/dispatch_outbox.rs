//! Transactional outbox for grading dispatch.
//!
//! Written in the same transaction as its handin, so a committed handin always
//! has a row here until a publish succeeds. Rows are kept after dispatch as an
//! audit trail; `dispatched_at IS NULL` is the undispatched flag.

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, PaginatorTrait, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dispatch_outbox")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub handin_id: String,
    /// Queue the message is routed to.
    pub channel: String,
    /// Encoded dispatch message.
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,
    /// Publish attempts so far, successful or not.
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the relay may try again.
    pub next_attempt_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::handin::Entity",
        from = "Column::HandinId",
        to = "super::handin::Column::Id",
        on_delete = "Restrict"
    )]
    Handin,
}

impl Related<super::handin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Handin.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Queues `payload` for `handin_id`, due immediately.
    pub async fn enqueue<C: ConnectionTrait>(
        db: &C,
        handin_id: &str,
        channel: &str,
        payload: Json,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            handin_id: Set(handin_id.to_string()),
            channel: Set(channel.to_string()),
            payload: Set(payload),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            next_attempt_at: Set(now),
            dispatched_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }
}

impl Entity {
    pub async fn find_by_handin<C: ConnectionTrait>(
        db: &C,
        handin_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::HandinId.eq(handin_id))
            .one(db)
            .await
    }

    /// Undispatched rows whose retry time has come, oldest first.
    pub async fn due<C: ConnectionTrait>(
        db: &C,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::DispatchedAt.is_null())
            .filter(Column::NextAttemptAt.lte(now))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(db)
            .await
    }

    /// Number of rows still waiting for a successful publish.
    pub async fn backlog<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::DispatchedAt.is_null())
            .count(db)
            .await
    }

    /// Records a successful publish. Returns `false` if another publisher got
    /// there first.
    pub async fn mark_dispatched<C: ConnectionTrait>(
        db: &C,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let res = Entity::update_many()
            .col_expr(Column::DispatchedAt, Expr::value(Some(now)))
            .col_expr(Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::DispatchedAt.is_null())
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Records a failed publish and pushes the row back to `next_attempt_at`.
    pub async fn record_failure<C: ConnectionTrait>(
        db: &C,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(Column::NextAttemptAt, Expr::value(next_attempt_at))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::DispatchedAt.is_null())
            .exec(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::handin::{self, NewHandin};
    use crate::test_utils::setup_test_db;
    use chrono::Duration;
    use serde_json::json;

    async fn seed_handin(db: &sea_orm::DatabaseConnection, id: &str) {
        let now = Utc::now();
        handin::Model::create(
            db,
            NewHandin {
                id: id.to_string(),
                owner_id: 1,
                assignment_id: "hw".into(),
                assignment_slug: "hw".into(),
                language: "java".into(),
                tier_deadline: now + Duration::days(1),
                tier_scale: 1.0,
                artifact_ref: "sha256:00".into(),
                submitted_at: now,
            },
        )
        .await
        .expect("seed handin");
    }

    #[tokio::test]
    async fn test_enqueue_and_due() {
        let db = setup_test_db().await;
        seed_handin(&db, "h1").await;
        let now = Utc::now();

        let row = Model::enqueue(&db, "h1", "default", json!({"handin_id": "h1"}), now)
            .await
            .unwrap();
        assert!(!row.is_dispatched());
        assert_eq!(Entity::backlog(&db).await.unwrap(), 1);

        let due = Entity::due(&db, now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload["handin_id"], "h1");
    }

    #[tokio::test]
    async fn test_outbox_requires_existing_handin() {
        let db = setup_test_db().await;
        db.execute_unprepared("PRAGMA foreign_keys = ON").await.unwrap();
        let res = Model::enqueue(&db, "missing", "default", json!({}), Utc::now()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_failure_backs_off_and_dispatch_is_once() {
        let db = setup_test_db().await;
        seed_handin(&db, "h2").await;
        let now = Utc::now();
        let row = Model::enqueue(&db, "h2", "default", json!({}), now).await.unwrap();

        Entity::record_failure(&db, row.id, "broker down", now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(Entity::due(&db, now, 10).await.unwrap().is_empty());

        let later = now + Duration::seconds(31);
        let due = Entity::due(&db, later, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
        assert_eq!(due[0].last_error.as_deref(), Some("broker down"));

        assert!(Entity::mark_dispatched(&db, row.id, later).await.unwrap());
        assert!(!Entity::mark_dispatched(&db, row.id, later).await.unwrap());

        let stored = Entity::find_by_handin(&db, "h2").await.unwrap().unwrap();
        assert!(stored.is_dispatched());
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error, None);
        assert_eq!(Entity::backlog(&db).await.unwrap(), 0);
    }
}
