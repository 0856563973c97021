//! Integration tests for the KV storage layer across both implementations.
//!
//! Exercises the revision contract, constraint exclusivity under real
//! concurrency, and index lifecycle against the in-memory and redb stores.

use std::sync::Arc;

use chrono::Utc;
use mailroom_core::{
    storage::{
        constraint::service_constraint_key, ConstraintManager, IndexManager, KvStore,
        MemoryKvStore, RedbKvStore, CONSTRAINTS_BUCKET, SERVICES_BUCKET,
    },
    ErrorKind, Revision, Service, ServiceId, ServiceType,
};

fn stores() -> Vec<(&'static str, Arc<dyn KvStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let redb = RedbKvStore::open(dir.path().join("test.redb")).unwrap();
    vec![
        ("memory", Arc::new(MemoryKvStore::new()), None),
        ("redb", Arc::new(redb), Some(dir)),
    ]
}

fn sample_service() -> Service {
    Service {
        uid: ServiceId::new(),
        service_type: ServiceType::Primary,
        project_uid: "proj-1".into(),
        project_name: "Project One".into(),
        group_name: "project-one".into(),
        prefix: None,
        owners: vec!["admin@example.org".into()],
        group_id: None,
        domain: "lists.example.org".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn revision_contract_holds_for_all_stores() {
    for (name, store, _guard) in stores() {
        let rev = store.put(SERVICES_BUCKET, "svc", b"v1".to_vec()).await.unwrap();

        // Stale writer loses, storage untouched
        let newer =
            store.put_with_revision(SERVICES_BUCKET, "svc", b"v2".to_vec(), rev).await.unwrap();
        let err = store
            .put_with_revision(SERVICES_BUCKET, "svc", b"v3".to_vec(), rev)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "store {name}");
        assert_eq!(store.get(SERVICES_BUCKET, "svc").await.unwrap().value, b"v2", "store {name}");

        // Winner's revision deletes
        store.delete(SERVICES_BUCKET, "svc", newer).await.unwrap();
        let err = store.get(SERVICES_BUCKET, "svc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "store {name}");
    }
}

#[tokio::test]
async fn concurrent_reservations_admit_exactly_one_winner() {
    for (name, store, _guard) in stores() {
        let mgr = ConstraintManager::new(store);
        let key = service_constraint_key("proj-race", ServiceType::Primary);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let mgr = mgr.clone();
            let key = key.clone();
            tasks.spawn(async move { mgr.reserve(&key, &format!("uid-{i}")).await });
        }

        let mut wins = 0;
        let mut conflicts = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(()) => wins += 1,
                Err(err) => {
                    assert_eq!(err.kind(), ErrorKind::Conflict, "store {name}");
                    conflicts += 1;
                },
            }
        }

        assert_eq!(wins, 1, "store {name}");
        assert_eq!(conflicts, 7, "store {name}");
    }
}

#[tokio::test]
async fn index_lifecycle_round_trip() {
    for (name, store, _guard) in stores() {
        let mgr = IndexManager::new(store.clone());
        let service = sample_service();

        let created = mgr.create_indices(&service).await.unwrap();
        assert_eq!(created.len(), 2, "store {name}");

        // Reverse lookup by group name resolves the service uid
        let lookup = mailroom_core::storage::index::group_name_lookup_key(&service.group_name);
        assert_eq!(mgr.resolve(&lookup).await.unwrap(), service.uid.to_string(), "store {name}");

        mgr.delete_indices(&service).await;
        for key in created {
            let err = store.get(CONSTRAINTS_BUCKET, &key).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "store {name}");
        }
    }
}

#[tokio::test]
async fn stale_delete_never_mutates_state() {
    for (name, store, _guard) in stores() {
        let rev = store.put(SERVICES_BUCKET, "svc", b"v1".to_vec()).await.unwrap();

        let err = store.delete(SERVICES_BUCKET, "svc", Revision(rev.0 + 100)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "store {name}");
        assert_eq!(store.get(SERVICES_BUCKET, "svc").await.unwrap().value, b"v1", "store {name}");
    }
}
