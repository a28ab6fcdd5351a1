//! End-to-end scenarios built entirely on the public API, one manager per
//! test so each exercises a full `build → run → shutdown` cycle.

use std::collections::HashMap;

use skorche::{PipelineManager, Queue, Task};

#[tokio::test]
async fn s1_map_adds_two() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(vec![1, 2, 3, 12, 99, -1]);
    let task = Task::new(|x: i32| Ok::<_, String>(x + 2)).name("add_two");
    let q_out = manager.map(task, &q_in).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    assert_eq!(q_out.flush(), vec![3, 4, 5, 14, 101, 1]);
}

#[tokio::test]
async fn s2_chain_of_three_tasks() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(vec![1, 5, -2, 12, 100]);
    let tasks = vec![
        Task::new(|x: i32| Ok::<_, String>(x + 1)).name("add_one"),
        Task::new(|x: i32| Ok::<_, String>(x * 2)).name("mul_two"),
        Task::new(|x: i32| Ok::<_, String>(x * x)).name("square"),
    ];
    let q_out = manager.chain(tasks, &q_in).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    let expected: Vec<i32> = vec![1, 5, -2, 12, 100]
        .into_iter()
        .map(|x| (2 * (x + 1)).pow(2))
        .collect();
    assert_eq!(q_out.flush(), expected);
}

#[tokio::test]
async fn s3_split_by_sign() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(vec![-2, 1, 4, -1, 7]);
    let q_true: Queue<i32> = manager.new_queue();
    let q_false: Queue<i32> = manager.new_queue();
    let mut outputs = HashMap::new();
    outputs.insert(true, q_true.clone());
    outputs.insert(false, q_false.clone());
    manager.split(|x: &i32| *x > 0, &q_in, outputs).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    assert_eq!(q_true.flush(), vec![1, 4, 7]);
    assert_eq!(q_false.flush(), vec![-2, -1]);
}

#[tokio::test]
async fn s4_merge_two_streams() {
    let mut manager = PipelineManager::new();
    let q1 = Queue::new().with_fixed_inputs(vec![1, 3, 5, 7]);
    let q2 = Queue::new().with_fixed_inputs(vec![0, 2, 4, 6]);
    let q_out: Queue<i32> = manager.new_queue();
    manager.merge(vec![q1, q2], &q_out).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    let mut out = q_out.flush();
    let odds: Vec<_> = out.iter().filter(|x| **x % 2 == 1).cloned().collect();
    let evens: Vec<_> = out.iter().filter(|x| **x % 2 == 0).cloned().collect();
    assert_eq!(odds, vec![1, 3, 5, 7]);
    assert_eq!(evens, vec![0, 2, 4, 6]);

    out.sort();
    assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 7]);
}

#[tokio::test]
async fn s5_batch_fills_exactly() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(0..15);
    let q_out: Queue<Vec<i32>> = manager.new_queue();
    manager.batch(&q_in, &q_out, 4, true).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    assert_eq!(
        q_out.flush(),
        vec![
            vec![0, 1, 2, 3],
            vec![4, 5, 6, 7],
            vec![8, 9, 10, 11],
            vec![12, 13, 14],
        ]
    );
}

#[tokio::test]
async fn s6_batch_then_unbatch_round_trips() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(0..20);
    let q_batched: Queue<Vec<i32>> = manager.new_queue();
    let q_out: Queue<i32> = manager.new_queue();
    manager.batch(&q_in, &q_batched, 7, true).unwrap();
    manager.unbatch(&q_batched, &q_out).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    let expected: Vec<i32> = (0..20).collect();
    assert_eq!(q_out.flush(), expected);
}

#[tokio::test]
async fn s7_filter_keeps_positive() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(vec![-1, 1, 2, -4, 1, 9, -2, -3]);
    let q_out: Queue<i32> = manager.new_queue();
    manager.filter(|x: &i32| *x > 0, &q_in, &q_out).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    assert_eq!(q_out.flush(), vec![1, 2, 1, 9]);
}

/// Property 7: init → build → run → shutdown → init is reusable indefinitely.
#[tokio::test]
async fn lifecycle_is_reusable_across_iterations() {
    let mut manager = PipelineManager::new();

    for round in 0..3 {
        let q_in = Queue::new().with_fixed_inputs(vec![round, round + 1, round + 2]);
        let task = Task::new(|x: i32| Ok::<_, String>(x * 2));
        let q_out = manager.map(task, &q_in).unwrap();

        manager.run().await.unwrap();
        manager.shutdown().await.unwrap();

        assert_eq!(
            q_out.flush(),
            vec![round * 2, (round + 1) * 2, (round + 2) * 2]
        );

        manager.reset();
    }
}

/// A multi-worker stage never lets more than one Eos through: a second
/// `get()` after the flush is a `DrainError`, not a second batch of values.
#[tokio::test]
async fn multi_worker_stage_forwards_exactly_one_eos() {
    let mut manager = PipelineManager::new();
    let q_in = Queue::new().with_fixed_inputs(0..200);
    let task = Task::new(|x: i32| Ok::<_, String>(x)).max_workers(6);
    let q_out = manager.map(task, &q_in).unwrap();

    manager.run().await.unwrap();
    manager.shutdown().await.unwrap();

    let mut out = q_out.flush();
    out.sort();
    assert_eq!(out, (0..200).collect::<Vec<_>>());
    assert!(matches!(
        q_out.get().await,
        Err(skorche::PipelineError::Drain(_))
    ));
}
