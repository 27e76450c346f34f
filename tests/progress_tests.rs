use jobforge::scheduler::progress::ProgressTracker;
use jobforge::scheduler::JobStatus;
use uuid::Uuid;

#[test]
fn test_updates_only_while_active() {
    let mut tracker = ProgressTracker::new();
    let job_id = Uuid::new_v4();
    tracker.track(job_id, None);

    // Not started yet
    assert_eq!(tracker.update(&job_id, 10), None);

    tracker.start(&job_id);
    assert_eq!(tracker.update(&job_id, 10), Some(10));
    assert_eq!(tracker.update(&job_id, 40), Some(40));
    assert_eq!(tracker.progress(&job_id), Some(40));
}

#[test]
fn test_rejects_regression_and_out_of_range() {
    let mut tracker = ProgressTracker::new();
    let job_id = Uuid::new_v4();
    tracker.track(job_id, None);
    tracker.start(&job_id);

    tracker.update(&job_id, 60);
    assert_eq!(tracker.update(&job_id, 30), None);
    assert_eq!(tracker.update(&job_id, 101), None);
    assert_eq!(tracker.update(&job_id, 60), Some(60));
    assert_eq!(tracker.progress(&job_id), Some(60));
}

#[test]
fn test_unknown_job_ignored() {
    let mut tracker = ProgressTracker::new();
    assert_eq!(tracker.update(&Uuid::new_v4(), 50), None);
}

#[test]
fn test_suspend_resets_for_next_attempt() {
    let mut tracker = ProgressTracker::new();
    let job_id = Uuid::new_v4();
    tracker.track(job_id, None);
    tracker.start(&job_id);
    tracker.update(&job_id, 70);

    tracker.suspend(&job_id);
    assert_eq!(tracker.progress(&job_id), Some(0));
    // Late report from the abandoned attempt
    assert_eq!(tracker.update(&job_id, 80), None);

    tracker.start(&job_id);
    assert_eq!(tracker.update(&job_id, 5), Some(5));
}

#[test]
fn test_finish_freezes_progress() {
    let mut tracker = ProgressTracker::new();
    let done = Uuid::new_v4();
    let failed = Uuid::new_v4();
    tracker.track(done, None);
    tracker.track(failed, None);
    tracker.start(&done);
    tracker.start(&failed);
    tracker.update(&failed, 30);

    tracker.finish(&done, JobStatus::Completed);
    tracker.finish(&failed, JobStatus::Failed);

    assert_eq!(tracker.progress(&done), Some(100));
    assert_eq!(tracker.progress(&failed), Some(30));
    assert_eq!(tracker.update(&failed, 90), None);

    // Restarting a finished job is not possible
    tracker.start(&failed);
    assert_eq!(tracker.progress(&failed), Some(30));
}

#[test]
fn test_group_aggregate() {
    let mut tracker = ProgressTracker::new();
    let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        tracker.track(*id, Some("batch"));
        tracker.start(id);
    }
    tracker.track(Uuid::new_v4(), Some("other"));

    tracker.finish(&ids[0], JobStatus::Completed);
    tracker.finish(&ids[1], JobStatus::Cancelled);
    tracker.update(&ids[2], 50);

    let group = tracker.group("batch").unwrap();
    assert_eq!(group.total, 4);
    assert_eq!(group.completed, 1);
    assert_eq!(group.cancelled, 1);
    assert_eq!(group.failed, 0);
    // (100 + 0 + 50 + 0) / 4
    assert_eq!(group.percent, 37);
    assert_eq!(group.fraction_completed(), 0.25);
    assert!(!group.is_finished());

    assert!(tracker.group("missing").is_none());
}

#[test]
fn test_group_finished() {
    let mut tracker = ProgressTracker::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    tracker.track(a, Some("g"));
    tracker.track(b, Some("g"));
    tracker.finish(&a, JobStatus::Completed);
    tracker.finish(&b, JobStatus::Failed);

    let group = tracker.group("g").unwrap();
    assert!(group.is_finished());
    assert_eq!(group.fraction_completed(), 0.5);
}

#[test]
fn test_forget_drops_empty_group() {
    let mut tracker = ProgressTracker::new();
    let a = Uuid::new_v4();
    tracker.track(a, Some("g"));

    tracker.forget(&a);
    assert_eq!(tracker.progress(&a), None);
    assert!(tracker.group("g").is_none());
}
