#![allow(dead_code)]

pub mod queues;

use chrono::{DateTime, Duration, TimeZone, Utc};
use db::models::handin::{self, Entity as Handin};
use db::test_utils::setup_test_db;
use intake::artifacts::ArtifactStore;
use intake::catalog::{Assignment, AssignmentCatalog};
use intake::clock::{Clock, ManualClock};
use intake::correlator::ResultCorrelator;
use intake::deadline::DeadlineTier;
use intake::dispatch::{DispatchQueue, OutboxRelay, RelayConfig, Routing};
use intake::ids::{HandinIdGenerator, SequentialIds};
use intake::languages::archive::pack;
use intake::languages::{LanguageRegistry, RawPayload, UploadLimits};
use intake::{SubmissionIntake, SubmitRequest};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub use queues::{AlwaysFailQueue, FixedIds, FlakyQueue, HangingQueue};

pub const LINKED_LIST: &str = "linked-list";
pub const LINKED_LIST_UUID: &str = "6c1f0e0c-linked-list";
pub const ESSAY: &str = "essay";
pub const LEGACY: &str = "legacy";

/// 23:59:59 on the given day of March 2026.
pub fn march(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 23, 59, 59).unwrap()
}

/// `linked-list`: on time until 1 March, 80% until 8 March, java/python.
/// `essay`: text answers until 8 March.
/// `legacy`: closed since January.
/// `ruby-intro`: enables a language nobody handles.
pub fn catalog() -> AssignmentCatalog {
    AssignmentCatalog::from_assignments(vec![
        Assignment::new(
            LINKED_LIST_UUID,
            LINKED_LIST,
            "Linked List",
            vec![
                DeadlineTier::new(march(1), 1.0),
                DeadlineTier::new(march(8), 0.8),
            ],
            vec!["java".into(), "python".into()],
        )
        .unwrap()
        .with_context(serde_json::json!({ "tests": ["insert", "remove"] })),
        Assignment::new(
            "uuid-essay",
            ESSAY,
            "Essay",
            vec![DeadlineTier::new(march(8), 1.0)],
            vec!["input".into()],
        )
        .unwrap(),
        Assignment::new(
            "uuid-legacy",
            LEGACY,
            "Legacy",
            vec![DeadlineTier::new(
                Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
                1.0,
            )],
            vec!["python".into()],
        )
        .unwrap(),
        Assignment::new(
            "uuid-ruby",
            "ruby-intro",
            "Ruby Intro",
            vec![DeadlineTier::new(march(8), 1.0)],
            vec!["ruby".into()],
        )
        .unwrap(),
    ])
    .unwrap()
}

pub fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let entries: Vec<(&str, &[u8])> = files.iter().map(|(n, c)| (*n, c.as_bytes())).collect();
    pack(&entries).unwrap()
}

pub fn python_upload() -> RawPayload {
    RawPayload::new("hw.zip", zip_of(&[("main.py", "print('hello')")]))
}

pub fn java_upload() -> RawPayload {
    RawPayload::new("hw.zip", zip_of(&[("src/Main.java", "class Main {}")]))
}

pub fn request(owner_id: i64, assignment: &str, language: &str, payload: RawPayload) -> SubmitRequest {
    SubmitRequest::new(owner_id, assignment, language, payload)
}

pub fn fast_relay_config() -> RelayConfig {
    RelayConfig {
        interval: std::time::Duration::from_millis(20),
        batch_size: 10,
        backoff_base: std::time::Duration::from_secs(1),
        backoff_max: std::time::Duration::from_secs(60),
        publish_timeout: std::time::Duration::from_millis(500),
    }
}

/// A clock that moves forward by `step` every time it is read.
pub struct TickingClock {
    next: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl TickingClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + self.step;
        now
    }
}

/// A fully wired intake over an in-memory database and a temp artifact dir.
pub struct Harness {
    pub db: DatabaseConnection,
    pub clock: Arc<ManualClock>,
    pub intake: SubmissionIntake,
    pub relay: OutboxRelay,
    pub correlator: ResultCorrelator,
    pub store: ArtifactStore,
    _artifacts: TempDir,
}

impl Harness {
    pub async fn new(queue: Arc<dyn DispatchQueue>) -> Self {
        Self::build(setup_test_db().await, queue, Arc::new(SequentialIds::new("h"))).await
    }

    pub async fn with_ids(queue: Arc<dyn DispatchQueue>, ids: Arc<dyn HandinIdGenerator>) -> Self {
        Self::build(setup_test_db().await, queue, ids).await
    }

    pub async fn build(
        db: DatabaseConnection,
        queue: Arc<dyn DispatchQueue>,
        ids: Arc<dyn HandinIdGenerator>,
    ) -> Self {
        let artifacts = TempDir::new().unwrap();
        let store = ArtifactStore::new(artifacts.path());
        // Three days before the on-time deadline.
        let clock = Arc::new(ManualClock::new(march(1) - Duration::days(3)));

        let relay = OutboxRelay::new(db.clone(), queue, fast_relay_config()).with_clock(clock.clone());
        let routing = Routing::new("default").with_route("java", "jvm");

        let intake = SubmissionIntake::new(
            db.clone(),
            Arc::new(catalog()),
            Arc::new(LanguageRegistry::with_defaults(UploadLimits::default())),
            store.clone(),
            relay.clone(),
            routing,
        )
        .with_ids(ids)
        .with_clock(clock.clone());

        let correlator = ResultCorrelator::new(db.clone()).with_clock(clock.clone());

        Self {
            db,
            clock,
            intake,
            relay,
            correlator,
            store,
            _artifacts: artifacts,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn handin(&self, id: &str) -> Option<handin::Model> {
        Handin::find_by_id(id).one(&self.db).await.unwrap()
    }

    pub async fn handin_count(&self) -> usize {
        Handin::find().all(&self.db).await.unwrap().len()
    }
}
