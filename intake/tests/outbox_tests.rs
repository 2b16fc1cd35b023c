mod helpers;

use chrono::Duration;
use db::models::dispatch_outbox::Entity as DispatchOutbox;
use helpers::*;
use intake::dispatch::RelayReport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_failed_publish_is_eventually_dispatched() {
    let queue = Arc::new(FlakyQueue::new(2));
    let h = Harness::new(queue.clone()).await;
    let mut jobs = queue.inner.subscribe("default").unwrap();

    let id = h
        .intake
        .submit(request(1, LINKED_LIST, "python", python_upload()))
        .await
        .unwrap();
    assert_eq!(h.relay.backlog().await.unwrap(), 1);

    // Backing off: nothing is due yet.
    assert_eq!(h.relay.relay_pending().await.unwrap(), RelayReport::default());

    h.clock.advance(Duration::seconds(2));
    let report = h.relay.relay_pending().await.unwrap();
    assert_eq!(report, RelayReport { published: 0, failed: 1 });

    h.clock.advance(Duration::seconds(3));
    let report = h.relay.relay_pending().await.unwrap();
    assert_eq!(report, RelayReport { published: 1, failed: 0 });

    assert_eq!(jobs.try_recv().unwrap().handin_id, id);
    assert_eq!(queue.attempts(), 3);
    assert_eq!(h.relay.backlog().await.unwrap(), 0);

    let row = DispatchOutbox::find_by_handin(&h.db, id.as_str()).await.unwrap().unwrap();
    assert_eq!(row.attempts, 3);
    assert!(row.is_dispatched());

    // Dispatched rows are not picked up again.
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.relay.relay_pending().await.unwrap(), RelayReport::default());
    assert!(jobs.try_recv().is_err());
}

#[tokio::test]
async fn test_backoff_grows_between_attempts() {
    let queue = Arc::new(AlwaysFailQueue::default());
    let h = Harness::new(queue.clone()).await;
    let id = h
        .intake
        .submit(request(1, LINKED_LIST, "python", python_upload()))
        .await
        .unwrap();
    let start = h.clock_now();

    let row = DispatchOutbox::find_by_handin(&h.db, id.as_str()).await.unwrap().unwrap();
    assert_eq!(row.next_attempt_at, start + Duration::seconds(1));

    h.clock.advance(Duration::seconds(1));
    h.relay.relay_pending().await.unwrap();
    let row = DispatchOutbox::find_by_handin(&h.db, id.as_str()).await.unwrap().unwrap();
    assert_eq!(row.attempts, 2);
    assert_eq!(row.next_attempt_at, start + Duration::seconds(1 + 2));
    assert_eq!(queue.attempts(), 2);
}

#[tokio::test]
async fn test_spawned_relay_drains_backlog_and_stops() {
    let queue = Arc::new(FlakyQueue::new(1));
    let h = Harness::new(queue.clone()).await;
    let mut jobs = queue.inner.subscribe("default").unwrap();

    let id = h
        .intake
        .submit(request(1, LINKED_LIST, "python", python_upload()))
        .await
        .unwrap();
    // Past the first backoff so the background sweep finds the row due.
    h.clock.advance(Duration::seconds(5));

    let token = CancellationToken::new();
    let task = h.relay.clone().spawn(token.clone());

    let job = tokio::time::timeout(std::time::Duration::from_secs(5), jobs.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.handin_id, id);

    token.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.relay.backlog().await.unwrap(), 0);
}
