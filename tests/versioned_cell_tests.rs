/// Versioned cell tests
///
/// Copy-on-write, head arbitration and materialization under concurrency
/// Run with: cargo test --test versioned_cell_tests

use std::sync::Arc;
use tokio::sync::Barrier;
use vstate::{
    DocumentLoader, Entity, EntityPhase, EntityType, Identity, Invariant, SequentialAllocator,
    SnapshotStatus, StateSnapshot, VersionedCell,
};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct PointState {
    x: i64,
    history: Vec<i64>,
}

struct Point;

impl EntityType for Point {
    type State = PointState;
    const KIND_NAME: &'static str = "Point";
    const KIND_ID: u16 = 3;
}

fn committed_cell(x: i64) -> Arc<VersionedCell<PointState>> {
    let cell = Arc::new(VersionedCell::empty(Identity::new(3, 100)));
    cell.persistent_load(
        StateSnapshot::pending(
            cell.identity(),
            PointState {
                x,
                history: vec![x],
            },
        ),
        1,
    )
    .unwrap();
    cell
}

#[tokio::test]
async fn test_scenario_new_entity_write_publish_read() {
    let allocator = SequentialAllocator::new();
    let point = Entity::<Point>::create(&allocator).unwrap();
    let cell = point.state();

    let initial = cell.head().unwrap();
    assert_eq!(initial.status(), SnapshotStatus::Pending);

    let snapshot = cell.write_for(1).unwrap();
    snapshot.fields_mut().unwrap().x = 5;
    cell.publish(&snapshot).unwrap();

    let seen = cell.read(2).unwrap();
    assert!(seen.is_committed());
    assert_eq!(seen.fields().unwrap().x, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenario_two_writers_share_one_clone() {
    let cell = committed_cell(5);
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = vec![];
    for tx in [2u64, 3] {
        let cell = Arc::clone(&cell);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let snapshot = cell.write_for(tx).unwrap();
            let start = snapshot.fields().unwrap().x;
            (snapshot, start)
        }));
    }

    let mut results = vec![];
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert!(Arc::ptr_eq(&results[0].0, &results[1].0));
    assert_eq!(results[0].1, 5);
    assert_eq!(results[1].1, 5);
    assert_eq!(cell.chain().len(), 2);
    let mut writers = results[0].0.writers().unwrap();
    writers.sort_unstable();
    assert_eq!(writers, vec![2, 3]);
}

#[tokio::test]
async fn test_scenario_materialized_entity_reads_without_write() {
    let documents = DocumentLoader::new();
    let id = Identity::new(Point::KIND_ID, 7);
    documents
        .insert(id, serde_json::json!({ "x": 10, "history": [] }))
        .unwrap();

    let point = Entity::<Point>::materialize(id);
    assert_eq!(point.phase(), EntityPhase::Constructing);
    point.load_with(&documents, 4).unwrap();

    let seen = point.state().read(5).unwrap();
    assert!(seen.is_committed());
    assert_eq!(seen.fields().unwrap().x, 10);
    assert_eq!(point.phase(), EntityPhase::Live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_clone_per_committed_head() {
    let num_tasks = 16;
    let cell = committed_cell(0);
    let barrier = Arc::new(Barrier::new(num_tasks));

    let mut handles = vec![];
    for task_id in 0..num_tasks {
        let cell = Arc::clone(&cell);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            cell.write_for(10 + task_id as u64).unwrap()
        }));
    }

    let mut clones = vec![];
    for handle in handles {
        clones.push(handle.await.unwrap());
    }

    let head = cell.head().unwrap();
    for clone in &clones {
        assert!(Arc::ptr_eq(clone, &head), "orphaned clone returned");
    }
    assert_eq!(head.writers().unwrap().len(), num_tasks);
    assert_eq!(cell.chain().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_committed_snapshot_never_sees_later_writes() {
    let cell = committed_cell(1);
    let observed = cell.read(2).unwrap();

    let writer = {
        let cell = Arc::clone(&cell);
        tokio::spawn(async move {
            for round in 0..50i64 {
                let tx = 100 + round as u64;
                let snapshot = cell.write_for(tx).unwrap();
                {
                    let mut fields = snapshot.fields_mut().unwrap();
                    fields.x = round * 10;
                    fields.history.push(round);
                }
                cell.commit(&snapshot, tx).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..50 {
        let fields = observed.fields().unwrap();
        assert_eq!(fields.x, 1);
        assert_eq!(fields.history, vec![1]);
        drop(fields);
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    assert_eq!(observed.fields().unwrap().x, 1);
    assert_eq!(cell.read(500).unwrap().fields().unwrap().x, 490);
}

#[tokio::test]
async fn test_publish_twice_changes_nothing() {
    let cell = committed_cell(3);
    let snapshot = cell.write_for(2).unwrap();
    snapshot.fields_mut().unwrap().x = 4;

    cell.publish(&snapshot).unwrap();
    let version = snapshot.version();
    let info = cell.info().unwrap();

    cell.publish(&snapshot).unwrap();
    assert!(snapshot.is_committed());
    assert_eq!(snapshot.version(), version);
    assert_eq!(cell.info().unwrap(), info);
    assert_eq!(snapshot.fields().unwrap().x, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_before_load_always_fail() {
    let point = Arc::new(Entity::<Point>::materialize(Identity::new(3, 55)));

    let mut handles = vec![];
    for task_id in 0..8u64 {
        let point = Arc::clone(&point);
        handles.push(tokio::spawn(async move {
            for round in 0..100u64 {
                let err = point.state().read(task_id * 1000 + round).unwrap_err();
                assert_eq!(err.invariant_kind(), Some(Invariant::NotMaterialized));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    point.persistent_load(PointState::default(), 1).unwrap();
    assert!(point.state().read(2).is_ok());
}

#[tokio::test]
async fn test_persistent_load_over_pending_head_fails() {
    let cell = committed_cell(0);
    cell.write_for(2).unwrap();

    let err = cell
        .persistent_load(StateSnapshot::pending(cell.identity(), PointState::default()), 3)
        .unwrap_err();
    assert_eq!(err.invariant_kind(), Some(Invariant::UncommittedHeadOnLoad));
}
