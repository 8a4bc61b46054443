//! Seeded property tests.
//!
//! Each test runs once per regression seed. A failure names the seed so the
//! run can be replayed.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_core::{PartitionId, SequenceId};
use relay_dispatch::WorkerState;
use relay_partition::OutgoingRecord;
use relay_progress::{CheckpointFaultConfig, CheckpointStore, SimulatedCheckpointStore};

use crate::properties::{check_checkpoint_monotonic, check_partition_order, check_round_trip};
use crate::scenarios::seeds::REGRESSION_SEEDS;
use crate::scenarios::{group, Pipeline, ScriptedHandler};

const KEYS: &[&str] = &["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];

/// Produces a random workload, returning what landed where.
async fn produce_random(
    pipeline: &Pipeline,
    rng: &mut StdRng,
    batches: usize,
) -> BTreeMap<(PartitionId, SequenceId), Bytes> {
    let mut produced = BTreeMap::new();
    let mut counter = 0u64;
    for _ in 0..batches {
        let size = rng.gen_range(1..=12);
        let records: Vec<OutgoingRecord> = (0..size)
            .map(|_| {
                let key = KEYS[rng.gen_range(0..KEYS.len())];
                counter += 1;
                OutgoingRecord::new(key, format!("{key}:{counter}"))
            })
            .collect();
        let payloads: Vec<Bytes> = records.iter().map(|r| r.payload.clone()).collect();

        let statuses = pipeline.producer.send_batch(records).await;
        for (status, payload) in statuses.into_iter().zip(payloads) {
            let produced_at = status.unwrap();
            produced.insert((produced_at.partition_id, produced_at.sequence_id), payload);
        }
    }
    produced
}

fn read_all(pipeline: &Pipeline) -> Vec<(PartitionId, SequenceId, Bytes)> {
    let mut out = Vec::new();
    for partition_id in pipeline.log.partition_ids() {
        let start = pipeline.log.metadata(partition_id).unwrap().log_start;
        for record in pipeline.log.read(partition_id, start, 10_000).unwrap() {
            out.push((partition_id, record.sequence_id, record.payload));
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_property_producer_keeps_per_key_order() {
    for &seed in REGRESSION_SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let pipeline = Pipeline::new(3);
        let produced = produce_random(&pipeline, &mut rng, 20).await;

        let stored = read_all(&pipeline);
        let violations = check_partition_order(&stored);
        assert!(violations.is_empty(), "seed {seed}: {violations:?}");
        let violations = check_round_trip(&produced, &stored);
        assert!(violations.is_empty(), "seed {seed}: {violations:?}");

        // Within a key, log order is send order.
        let mut last_counter: BTreeMap<&str, u64> = BTreeMap::new();
        for (_, _, payload) in &stored {
            let text = std::str::from_utf8(payload).unwrap();
            let (key, counter) = text.split_once(':').unwrap();
            let counter: u64 = counter.parse().unwrap();
            if let Some(previous) = last_counter.insert(key, counter) {
                assert!(previous < counter, "seed {seed}: {key} reordered");
            }
        }
    }
}

#[tokio::test]
async fn test_property_checkpoint_never_regresses_under_faults() {
    let partition_id = PartitionId::new(0);
    for &seed in REGRESSION_SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let store = SimulatedCheckpointStore::with_faults(seed, CheckpointFaultConfig::flaky());

        let mut observed = vec![None];
        let mut highest_accepted: Option<SequenceId> = None;
        for _ in 0..200 {
            let target = SequenceId::new(rng.gen_range(0..100));
            if store.commit(&group(), partition_id, target).await.is_ok() {
                highest_accepted = highest_accepted.max(Some(target));
            }
            let current = store
                .snapshot()
                .into_iter()
                .find(|c| c.partition_id == partition_id)
                .map(|c| c.sequence_id);
            observed.push(current);
        }

        let violations = check_checkpoint_monotonic(partition_id, &observed);
        assert!(violations.is_empty(), "seed {seed}: {violations:?}");
        assert_eq!(observed.last().copied().flatten(), highest_accepted, "seed {seed}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_property_dispatch_delivers_everything_in_order() {
    for &seed in REGRESSION_SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pipeline = Pipeline::new(3);
        pipeline.checkpoints = SimulatedCheckpointStore::with_faults(
            seed,
            CheckpointFaultConfig::none().with_commit_fail_rate(0.1),
        );
        let produced = produce_random(&pipeline, &mut rng, 15).await;

        let handler = Arc::new(ScriptedHandler::failing(rng.gen_range(0..=3)));
        let config = Pipeline::dispatcher_config()
            .with_batch_size(rng.gen_range(1..=8))
            .with_max_retries(5)
            .with_commit_attempts(20);
        let handle = pipeline.start(config, handler.clone()).unwrap();

        for partition_id in pipeline.log.partition_ids() {
            let end = pipeline.log.metadata(partition_id).unwrap().log_end;
            if end.get() > 0 {
                pipeline
                    .wait_for_checkpoint(partition_id, SequenceId::new(end.get() - 1))
                    .await;
            }
        }
        let states = handle.shutdown().await;
        assert!(
            states.values().all(|s| *s == WorkerState::Stopped),
            "seed {seed}: {states:?}"
        );

        let delivered = handler.delivered_records();
        let violations = check_partition_order(&delivered);
        assert!(violations.is_empty(), "seed {seed}: {violations:?}");
        let violations = check_round_trip(&produced, &delivered);
        assert!(violations.is_empty(), "seed {seed}: {violations:?}");
        assert!(pipeline.dead_letters.letters().is_empty(), "seed {seed}");
    }
}
