//! Integration tests for JobQueue
//!
//! These tests verify that the JobQueue correctly:
//! - Hands out jobs in submission order
//! - Gives every job to exactly one worker under contention
//! - Wakes blocked workers on enqueue and close
//! - Emits events to every subscriber

use camino::Utf8PathBuf;
use chrono::Local;
use facesort::models::{FolderSelection, JobId, JobState, SelectionSource};
use facesort::{JobQueue, QueueError, QueueEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{Duration, timeout};

fn selection(path: &str) -> FolderSelection {
    FolderSelection {
        path: Utf8PathBuf::from(path),
        source: SelectionSource::ManualEntry,
        resolved_at: Local::now(),
    }
}

#[tokio::test]
async fn test_single_worker_dequeues_in_submission_order() {
    let queue = JobQueue::new();
    let submitted: Vec<JobId> = (0..20)
        .map(|i| queue.enqueue(selection(&format!("/photos/{i}"))).unwrap())
        .collect();
    queue.close();

    let mut dequeued = Vec::new();
    while let Some(job) = queue.dequeue_next(0).await {
        dequeued.push(job.id);
        queue.mark_failed(job.id, "not processed in this test").unwrap();
    }

    assert_eq!(dequeued, submitted);
}

#[tokio::test]
async fn test_job_queued_event_emitted() {
    let queue = JobQueue::new();
    let mut rx = queue.subscribe();

    let id = queue.enqueue(selection("/photos/a")).unwrap();

    let event = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");

    assert_eq!(
        event,
        QueueEvent::JobQueued {
            id,
            path: Utf8PathBuf::from("/photos/a")
        }
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let queue = JobQueue::new();
    let mut rx1 = queue.subscribe();
    let mut rx2 = queue.subscribe();

    let id = queue.enqueue(selection("/photos/a")).unwrap();
    queue.cancel(id).unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let mut events = Vec::new();
        while let Ok(Ok(event)) = timeout(Duration::from_millis(100), rx.recv()).await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(QueueEvent::JobQueued { .. })));
        assert!(events.contains(&QueueEvent::JobCancelled { id }));
        assert_eq!(events.last(), Some(&QueueEvent::QueueDrained));
    }
}

#[tokio::test]
async fn test_concurrent_workers_never_share_a_job() {
    let queue = Arc::new(JobQueue::new());
    for i in 0..200 {
        queue.enqueue(selection(&format!("/photos/{i}"))).unwrap();
    }
    queue.close();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(job) = queue.dequeue_next(worker).await {
                assert_eq!(job.worker, Some(worker));
                taken.push(job.id);
                queue.mark_failed(job.id, "done").unwrap();
            }
            taken
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.await.unwrap() {
            total += 1;
            assert!(seen.insert(id), "job {id} handed out twice");
        }
    }

    assert_eq!(total, 200);
    assert!(queue.list().iter().all(|job| job.state == JobState::Failed));
}

#[tokio::test]
async fn test_blocked_worker_wakes_on_enqueue() {
    let queue = Arc::new(JobQueue::new());

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue_next(0).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    let id = queue.enqueue(selection("/photos/late")).unwrap();

    let job = timeout(Duration::from_secs(1), waiter)
        .await
        .expect("Worker was not woken")
        .unwrap()
        .expect("Queue returned no job");
    assert_eq!(job.id, id);
    assert_eq!(job.state, JobState::Running);
}

#[tokio::test]
async fn test_blocked_workers_released_on_close() {
    let queue = Arc::new(JobQueue::new());

    let waiters: Vec<_> = (0..3)
        .map(|worker| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_next(worker).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.close();

    for waiter in waiters {
        let job = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("Worker was not released")
            .unwrap();
        assert!(job.is_none());
    }
}

#[tokio::test]
async fn test_cancelled_job_is_skipped() {
    let queue = JobQueue::new();
    let a = queue.enqueue(selection("/a")).unwrap();
    let b = queue.enqueue(selection("/b")).unwrap();
    let c = queue.enqueue(selection("/c")).unwrap();

    queue.cancel(b).unwrap();

    assert_eq!(queue.try_dequeue(0).unwrap().id, a);
    assert_eq!(queue.try_dequeue(0).unwrap().id, c);
    assert!(queue.try_dequeue(0).is_none());
    assert_eq!(
        queue.cancel(a),
        Err(QueueError::NotCancellable {
            id: a,
            state: JobState::Running
        })
    );
}

#[tokio::test]
async fn test_list_is_a_snapshot() {
    let queue = JobQueue::new();
    let id = queue.enqueue(selection("/a")).unwrap();

    let before = queue.list();
    queue.try_dequeue(0).unwrap();

    assert_eq!(before[0].id, id);
    assert_eq!(before[0].state, JobState::Queued);
    assert_eq!(queue.get(id).unwrap().state, JobState::Running);
}
