/// Relation registry tests
///
/// Lazy, at-most-once relation handles and relation lists in transactions
/// Run with: cargo test --test relation_registry_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;
use vstate::{
    Entity, EntityType, Identity, Invariant, LazyRelationRegistry, RelationList, RelationSpec,
    SequentialAllocator, StateError, TransactionManager,
};

#[derive(Debug, Clone, Default)]
struct FolderState {
    title: String,
}

struct Folder;

impl EntityType for Folder {
    type State = FolderState;
    const KIND_NAME: &'static str = "Folder";
    const KIND_ID: u16 = 5;

    fn relations() -> &'static [RelationSpec] {
        const RELATIONS: &[RelationSpec] = &[
            RelationSpec::eager("children"),
            RelationSpec::lazy("watchers"),
        ];
        RELATIONS
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_scenario_eight_racers_share_one_handle() {
    let owner = Identity::new(5, 1);
    let registry = Arc::new(LazyRelationRegistry::<RelationList>::new());
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let mut handles = vec![];
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let factory_calls = Arc::clone(&factory_calls);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            registry
                .get_or_create("children", || {
                    factory_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RelationList::new(owner, "children"))
                })
                .unwrap()
        }));
    }

    let mut lists = vec![];
    for handle in handles {
        lists.push(handle.await.unwrap());
    }

    let calls = factory_calls.load(Ordering::SeqCst);
    assert!(calls >= 1);
    for list in &lists {
        assert!(Arc::ptr_eq(list, &lists[0]));
    }

    let again = registry
        .get_or_create("children", || {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RelationList::new(owner, "children"))
        })
        .unwrap();
    assert!(Arc::ptr_eq(&again, &lists[0]));
    assert_eq!(factory_calls.load(Ordering::SeqCst), calls);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_entity_relation_unique_across_names() {
    let allocator = SequentialAllocator::new();
    let folder = Arc::new(Entity::<Folder>::create(&allocator).unwrap());
    let barrier = Arc::new(Barrier::new(16));

    let mut handles = vec![];
    for task_id in 0..16 {
        let folder = Arc::clone(&folder);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let name = if task_id % 2 == 0 { "children" } else { "watchers" };
            (name, folder.relation(name).unwrap())
        }));
    }

    let mut children = vec![];
    let mut watchers = vec![];
    for handle in handles {
        let (name, list) = handle.await.unwrap();
        if name == "children" {
            children.push(list);
        } else {
            watchers.push(list);
        }
    }

    assert!(children.iter().all(|l| Arc::ptr_eq(l, &children[0])));
    assert!(watchers.iter().all(|l| Arc::ptr_eq(l, &watchers[0])));
    assert!(!Arc::ptr_eq(&children[0], &watchers[0]));
    assert_eq!(folder.loaded_relations(), vec!["children", "watchers"]);
}

#[tokio::test]
async fn test_relation_changes_follow_transactions() {
    let allocator = SequentialAllocator::new();
    let manager = TransactionManager::new();
    let folder = Entity::<Folder>::create(&allocator).unwrap();
    let child = Identity::new(6, 1);
    let children = folder.relation("children").unwrap();

    let txn = manager.begin();
    assert!(children.add(&txn, child).unwrap());
    assert!(!children.add(&txn, child).unwrap());
    manager.commit(&txn).unwrap();

    let txn = manager.begin();
    assert!(children.remove(&txn, &child).unwrap());
    assert_eq!(children.len(&txn).unwrap(), 0);
    manager.rollback(&txn).unwrap();

    let reader = manager.begin_read_only();
    assert!(children.contains(&reader, &child).unwrap());
    assert_eq!(children.to_vec(&reader).unwrap(), vec![child]);
}

#[tokio::test]
async fn test_rolled_back_relation_change_on_fresh_owner_is_dropped() {
    let allocator = SequentialAllocator::new();
    let manager = TransactionManager::new();
    let folder = Entity::<Folder>::create(&allocator).unwrap();
    let children = folder.relation("children").unwrap();
    let (a, b) = (Identity::new(6, 1), Identity::new(6, 2));

    let first = manager.begin();
    let second = manager.begin();
    children.add(&first, a).unwrap();
    children.add(&second, b).unwrap();
    manager.rollback(&first).unwrap();
    assert!(manager.commit(&second).unwrap_err().is_retryable());

    let retry = manager.begin();
    children.add(&retry, b).unwrap();
    manager.commit(&retry).unwrap();

    let reader = manager.begin_read_only();
    assert_eq!(children.to_vec(&reader).unwrap(), vec![b]);
}

#[tokio::test]
async fn test_materialized_relation_must_be_loaded() {
    let manager = TransactionManager::new();
    let folder = Entity::<Folder>::materialize(Identity::new(5, 9));
    folder
        .persistent_load(
            FolderState {
                title: "docs".into(),
            },
            1,
        )
        .unwrap();

    let children = folder.relation("children").unwrap();
    let reader = manager.begin_read_only();
    let err = children.len(&reader).unwrap_err();
    assert_eq!(err.invariant_kind(), Some(Invariant::NotMaterialized));

    children
        .load([Identity::new(6, 1), Identity::new(6, 2)], 1)
        .unwrap();
    assert_eq!(children.len(&reader).unwrap(), 2);
    assert_eq!(folder.get(&reader, |s| s.title.clone()).unwrap(), "docs");
}

#[tokio::test]
async fn test_undeclared_relation_is_rejected() {
    let allocator = SequentialAllocator::new();
    let folder = Entity::<Folder>::create(&allocator).unwrap();
    match folder.relation("parents") {
        Err(StateError::UnknownRelation { kind, relation }) => {
            assert_eq!(kind, "Folder");
            assert_eq!(relation, "parents");
        }
        other => panic!("expected UnknownRelation, got {:?}", other),
    }
}
