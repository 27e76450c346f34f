use jobforge::scheduler::{Job, JobQueue, JobSpec, Resources};
use jobforge::SchedulerError;
use uuid::Uuid;

fn job(priority: i32, cpu: u32, memory: u64) -> Job {
    let spec = JobSpec::new("work")
        .with_priority(priority)
        .with_requirements(Resources::new(cpu, memory));
    Job::new(spec, 3)
}

fn roomy() -> Vec<Resources> {
    vec![Resources::new(64, 65_536)]
}

#[test]
fn test_higher_priority_first() {
    let mut queue = JobQueue::new();
    let low = job(1, 1, 1);
    let high = job(10, 1, 1);
    let mid = job(5, 1, 1);
    queue.enqueue(&low);
    queue.enqueue(&high);
    queue.enqueue(&mid);

    assert_eq!(queue.ordered_ids(), vec![high.id, mid.id, low.id]);
    assert_eq!(queue.dequeue_eligible(&roomy()).unwrap().id, high.id);
    assert_eq!(queue.dequeue_eligible(&roomy()).unwrap().id, mid.id);
    assert_eq!(queue.dequeue_eligible(&roomy()).unwrap().id, low.id);
    assert!(queue.dequeue_eligible(&roomy()).is_none());
}

#[test]
fn test_fifo_within_priority() {
    let mut queue = JobQueue::new();
    let jobs: Vec<Job> = (0..5).map(|_| job(3, 1, 1)).collect();
    for j in &jobs {
        queue.enqueue(j);
    }

    let drained: Vec<Uuid> = std::iter::from_fn(|| queue.dequeue_eligible(&roomy()))
        .map(|e| e.id)
        .collect();
    let expected: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(drained, expected);
}

#[test]
fn test_negative_priorities_sort_last() {
    let mut queue = JobQueue::new();
    let negative = job(-5, 1, 1);
    let zero = job(0, 1, 1);
    queue.enqueue(&negative);
    queue.enqueue(&zero);

    assert_eq!(queue.ordered_ids(), vec![zero.id, negative.id]);
}

#[test]
fn test_requeue_goes_to_head_of_band() {
    let mut queue = JobQueue::new();
    let a = job(5, 1, 1);
    let b = job(5, 1, 1);
    let retried = job(5, 1, 1);
    let urgent = job(9, 1, 1);
    queue.enqueue(&a);
    queue.enqueue(&b);
    queue.enqueue(&urgent);
    queue.requeue(&retried);

    // Ahead of its own band, still behind higher priority work
    assert_eq!(queue.ordered_ids(), vec![urgent.id, retried.id, a.id, b.id]);
}

#[test]
fn test_later_requeue_precedes_earlier() {
    let mut queue = JobQueue::new();
    let first = job(0, 1, 1);
    let second = job(0, 1, 1);
    queue.requeue(&first);
    queue.requeue(&second);

    assert_eq!(queue.ordered_ids(), vec![second.id, first.id]);
}

#[test]
fn test_duplicate_enqueue_rejected() {
    let mut queue = JobQueue::new();
    let j = job(0, 1, 1);
    assert!(queue.enqueue(&j));
    assert!(!queue.enqueue(&j));
    assert!(!queue.requeue(&j));
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_no_head_of_line_blocking() {
    let mut queue = JobQueue::new();
    let big = job(10, 8, 8192);
    let small = job(1, 1, 512);
    queue.enqueue(&big);
    queue.enqueue(&small);

    // Only a small worker is free: the big job is skipped, not blocking.
    let spare = vec![Resources::new(2, 1024)];
    let entry = queue.dequeue_eligible(&spare).unwrap();
    assert_eq!(entry.id, small.id);

    // The big job keeps its place
    assert!(queue.contains(&big.id));
    assert_eq!(queue.ordered_ids(), vec![big.id]);
    assert!(queue.dequeue_eligible(&spare).is_none());
}

#[test]
fn test_eligibility_checks_every_dimension() {
    let mut queue = JobQueue::new();
    let memory_heavy = job(0, 1, 4096);
    queue.enqueue(&memory_heavy);

    // Plenty of CPU, not enough memory
    assert!(queue.dequeue_eligible(&[Resources::new(32, 1024)]).is_none());
    // Fits on the second candidate
    let spares = [Resources::new(32, 1024), Resources::new(1, 4096)];
    assert_eq!(queue.dequeue_eligible(&spares).unwrap().id, memory_heavy.id);
}

#[test]
fn test_no_workers_dequeues_nothing() {
    let mut queue = JobQueue::new();
    queue.enqueue(&job(0, 0, 0));
    assert!(queue.dequeue_eligible(&[]).is_none());
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_restore_keeps_position() {
    let mut queue = JobQueue::new();
    let a = job(1, 1, 1);
    let b = job(1, 1, 1);
    let c = job(1, 1, 1);
    queue.enqueue(&a);
    queue.enqueue(&b);
    queue.enqueue(&c);

    let entry = queue.dequeue_eligible(&roomy()).unwrap();
    assert_eq!(entry.id, a.id);
    queue.restore(entry);

    assert_eq!(queue.ordered_ids(), vec![a.id, b.id, c.id]);
}

#[test]
fn test_remove() {
    let mut queue = JobQueue::new();
    let a = job(1, 1, 1);
    let b = job(1, 1, 1);
    queue.enqueue(&a);
    queue.enqueue(&b);

    let removed = queue.remove(&a.id).unwrap();
    assert_eq!(removed.id, a.id);
    assert!(!queue.contains(&a.id));
    assert_eq!(queue.ordered_ids(), vec![b.id]);

    assert_eq!(
        queue.remove(&a.id).unwrap_err(),
        SchedulerError::JobNotFound(a.id)
    );
}

#[test]
fn test_zero_requirements_always_eligible() {
    let mut queue = JobQueue::new();
    let free = job(0, 0, 0);
    queue.enqueue(&free);

    let entry = queue.dequeue_eligible(&[Resources::ZERO]).unwrap();
    assert_eq!(entry.id, free.id);
    assert!(queue.is_empty());
}
