//! End-to-end namespace scenarios over in-memory targets.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cmm_dlm::{LocalLockManager, LockError};
use cmm_fld::FldError;
use cmm_memtarget::{MemConnector, MemDataObjectStore, MemTarget};
use cmm_proto::{
    is_reg, ConfigEvent, DataLayout, OpContext, RenamePhase, RenameReq, S_IFLNK, S_IFMT,
};
use cmm_stubs::{ILockManager, ITargetStub, MockFidAllocator, MockLockManager};
use cmm_types::{
    make_error, DataObjectCode, Fid, NamespaceCode, NodeOrdinal, RPCCode, TargetIndex, ROOT_FID,
};

use crate::config::{DirPlacement, NamespaceConfig, RetryConfig};
use crate::dispatch::Credentials;
use crate::error::NamespaceError;
use crate::lifecycle::{Collaborators, ManagerState, NamespaceManager};

const T0: TargetIndex = TargetIndex(0);
const T1: TargetIndex = TargetIndex(1);

fn config(owner: u64, dir_placement: DirPlacement) -> NamespaceConfig {
    NamespaceConfig {
        lock_owner: Some(owner),
        dir_placement,
        retry: RetryConfig {
            max_attempts: 3,
            init_wait: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
            total_time: Duration::from_secs(5),
        },
        ..Default::default()
    }
}

fn creds() -> Credentials {
    Credentials::new(0, 0)
}

struct Cluster {
    connector: Arc<MemConnector>,
    data: Arc<MemDataObjectStore>,
    manager: Arc<NamespaceManager>,
}

impl Cluster {
    async fn start(config: NamespaceConfig) -> Self {
        Self::join(
            Arc::new(MemConnector::default()),
            Arc::new(LocalLockManager::new()),
            config,
            0,
        )
        .await
    }

    /// Another node over the same targets and lock manager.
    async fn join(
        connector: Arc<MemConnector>,
        lock_manager: Arc<dyn ILockManager>,
        config: NamespaceConfig,
        ordinal: u32,
    ) -> Self {
        let data = Arc::new(MemDataObjectStore::new());
        let manager = NamespaceManager::new(
            config,
            Collaborators {
                connector: connector.clone(),
                lock_manager,
                fids: None,
                data: data.clone(),
            },
        );
        manager
            .process_config(ConfigEvent::Setup {
                local_ordinal: NodeOrdinal(ordinal),
            })
            .await
            .unwrap();
        for index in 0..2 {
            manager
                .process_config(ConfigEvent::AddTarget {
                    index: TargetIndex(index),
                    connection_info: format!("mem://mdt{index}"),
                })
                .await
                .unwrap();
        }
        Self {
            connector,
            data,
            manager: Arc::new(manager),
        }
    }

    fn target(&self, index: TargetIndex) -> Arc<MemTarget> {
        self.connector.target(index)
    }

    async fn shutdown(self) {
        self.manager
            .process_config(ConfigEvent::Cleanup)
            .await
            .unwrap();
        assert_eq!(self.manager.state(), ManagerState::Closed);
    }
}

/// Directory `d0` on target 0 and `d1` on target 1.
async fn split_dirs(cluster: &Cluster) -> (Fid, Fid) {
    let ops = cluster.manager.ops().unwrap();
    let d0 = ops.mkdir(&creds(), ROOT_FID, "d0", 0o755).await.unwrap();
    let d1 = ops.mkdir(&creds(), ROOT_FID, "d1", 0o755).await.unwrap();
    assert!(cluster.target(T0).contains(d0.fid));
    assert!(cluster.target(T1).contains(d1.fid));
    (d0.fid, d1.fid)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_add_target() {
    let connector = Arc::new(MemConnector::default());
    let manager = NamespaceManager::new(
        config(1, DirPlacement::Parent),
        Collaborators {
            connector: connector.clone(),
            lock_manager: Arc::new(LocalLockManager::new()),
            fids: None,
            data: Arc::new(MemDataObjectStore::new()),
        },
    );
    manager
        .process_config(ConfigEvent::Setup {
            local_ordinal: NodeOrdinal(0),
        })
        .await
        .unwrap();
    let manager = Arc::new(manager);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.add_target(T0, "mem://mdt0").await })
        })
        .collect();
    let mut added = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => added += 1,
            Err(e) => assert!(matches!(e, NamespaceError::AlreadyExists), "{e}"),
        }
    }
    assert_eq!(added, 1);
    assert_eq!(manager.registry().count(), 1);
    assert_eq!(connector.live_connections(T0), 1);

    manager.process_config(ConfigEvent::Cleanup).await.unwrap();
    assert_eq!(connector.live_connections(T0), 0);
}

#[tokio::test]
async fn test_create_then_lookup() {
    let cluster = Cluster::start(config(1, DirPlacement::Parent)).await;
    let ops = cluster.manager.ops().unwrap();

    let created = ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap();
    assert!(is_reg(created.mode));
    assert_eq!(created.mode & 0o777, 0o644);

    ops.cache().clear();
    let found = ops.lookup(&creds(), ROOT_FID, "f").await.unwrap();
    assert_eq!(found.fid, created.fid);
    assert_eq!(cluster.target(T0).call_count("lookup"), 1);

    // Served from the cache this time.
    ops.lookup(&creds(), ROOT_FID, "f").await.unwrap();
    assert_eq!(cluster.target(T0).call_count("lookup"), 1);

    assert!(matches!(
        ops.create(&creds(), ROOT_FID, "f", 0o644).await,
        Err(NamespaceError::AlreadyExists)
    ));
    assert!(ops
        .lookup(&creds(), ROOT_FID, "missing")
        .await
        .unwrap_err()
        .is_not_found());

    let link = ops.symlink(&creds(), ROOT_FID, "l", "/a/b").await.unwrap();
    assert_eq!(link.mode & S_IFMT, S_IFLNK);
    assert_eq!(
        cluster.target(T0).symlink_body(link.fid).as_deref(),
        Some("/a/b")
    );
    assert_eq!(
        cluster.target(T0).entry_names(ROOT_FID),
        vec!["f".to_string(), "l".to_string()]
    );
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unlink_destroys_data_once() {
    let cluster = Cluster::start(config(1, DirPlacement::Parent)).await;
    let ops = cluster.manager.ops().unwrap();

    let f = ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap();
    assert_eq!(ops.unlink(&creds(), ROOT_FID, "f").await.unwrap(), f.fid);
    assert_eq!(cluster.data.requests(), vec![f.fid]);
    assert_eq!(cluster.data.destroyed_count(), 1);
    assert!(!cluster.target(T0).contains(f.fid));
    assert!(ops.orphans().is_empty());

    // A failed destroy does not fail the unlink.
    let g = ops.create(&creds(), ROOT_FID, "g", 0o644).await.unwrap();
    cluster.data.fail_next(DataObjectCode::DESTROY_FAILED);
    assert_eq!(ops.unlink(&creds(), ROOT_FID, "g").await.unwrap(), g.fid);
    assert_eq!(cluster.data.requests(), vec![f.fid, g.fid]);
    let orphans = ops.orphans().records();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].fid, g.fid);

    assert_eq!(ops.retry_orphans().await, 1);
    assert!(ops.orphans().is_empty());
    assert_eq!(cluster.data.destroyed_count(), 2);

    assert!(ops
        .unlink(&creds(), ROOT_FID, "g")
        .await
        .unwrap_err()
        .is_not_found());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_empty_layout_is_recorded_as_orphan() {
    let cluster = Cluster::start(config(1, DirPlacement::Parent)).await;
    let ops = cluster.manager.ops().unwrap();

    let f = ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap();
    assert!(cluster
        .target(T0)
        .set_layout(f.fid, Some(DataLayout::default())));
    assert_eq!(ops.unlink(&creds(), ROOT_FID, "f").await.unwrap(), f.fid);
    assert!(!cluster.target(T0).contains(f.fid));
    assert!(cluster.data.requests().is_empty());

    let orphans = ops.orphans().records();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].fid, f.fid);
    assert_eq!(orphans[0].reason, "empty layout in destroy reply");
    assert_eq!(orphans[0].layout, Some(DataLayout::default()));

    // Nothing to destroy with, so it stays recorded.
    assert_eq!(ops.retry_orphans().await, 0);
    assert_eq!(ops.orphans().len(), 1);
    assert!(cluster.data.requests().is_empty());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_cross_target_rename_replaces_destination() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (d0, d1) = split_dirs(&cluster).await;

    let f = ops.create(&creds(), d0, "f", 0o644).await.unwrap();
    let f2 = ops.create(&creds(), d1, "f2", 0o600).await.unwrap();
    assert!(cluster.target(T0).contains(f.fid));
    assert!(cluster.target(T1).contains(f2.fid));

    ops.rename(&creds(), d0, "f", d1, "f2").await.unwrap();

    assert_eq!(cluster.data.requests(), vec![f2.fid]);
    assert!(!cluster.target(T1).contains(f2.fid));
    assert!(cluster.target(T0).entry_names(d0).is_empty());
    assert_eq!(cluster.target(T1).entry_names(d1), vec!["f2".to_string()]);

    let moved = ops.lookup(&creds(), d1, "f2").await.unwrap();
    assert_eq!(moved.fid, f.fid);
    assert_eq!(moved.mode & 0o777, 0o644);
    assert!(ops
        .getattr(&creds(), f2.fid)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(ops
        .lookup(&creds(), d0, "f")
        .await
        .unwrap_err()
        .is_not_found());

    // The moved file can be unlinked through its remote name.
    ops.unlink(&creds(), d1, "f2").await.unwrap();
    assert_eq!(cluster.data.requests(), vec![f2.fid, f.fid]);
    assert!(!cluster.target(T0).contains(f.fid));
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_cross_target_rename_type_checks() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (d0, d1) = split_dirs(&cluster).await;

    ops.create(&creds(), d0, "file", 0o644).await.unwrap();
    // Round robin puts "sub" on target 0.
    ops.mkdir(&creds(), d1, "sub", 0o755).await.unwrap();

    let err = ops
        .rename(&creds(), d0, "file", d1, "sub")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(NamespaceCode::IS_DIRECTORY));
    // Nothing moved.
    assert_eq!(cluster.target(T0).entry_names(d0), vec!["file".to_string()]);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_rename_over_remote_directory_checks_emptiness() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (_, d1) = split_dirs(&cluster).await;
    ops.create(&creds(), d1, "inner", 0o644).await.unwrap();
    // Round robin puts "a" on target 0, next to its parent.
    let a = ops.mkdir(&creds(), ROOT_FID, "a", 0o755).await.unwrap();
    assert!(cluster.target(T0).contains(a.fid));

    let err = ops
        .rename(&creds(), ROOT_FID, "a", ROOT_FID, "d1")
        .await
        .unwrap_err();
    assert!(matches!(err, NamespaceError::Rejected { .. }), "{err}");
    assert_eq!(err.status_code(), Some(NamespaceCode::NOT_EMPTY));
    assert_eq!(cluster.target(T0).call_count("rename"), 0);
    assert_eq!(
        cluster.target(T0).entry_names(ROOT_FID),
        vec!["a".to_string(), "d0".to_string(), "d1".to_string()]
    );
    assert_eq!(cluster.target(T1).entry_names(d1), vec!["inner".to_string()]);

    // Once empty, the remote directory is replaced and removed from its owner.
    ops.unlink(&creds(), d1, "inner").await.unwrap();
    ops.rename(&creds(), ROOT_FID, "a", ROOT_FID, "d1").await.unwrap();
    assert!(!cluster.target(T1).contains(d1));
    assert_eq!(ops.lookup(&creds(), ROOT_FID, "d1").await.unwrap().fid, a.fid);
    assert_eq!(
        cluster.target(T0).entry_names(ROOT_FID),
        vec!["d0".to_string(), "d1".to_string()]
    );
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_phase_two_rename_failure_is_partial() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (d0, d1) = split_dirs(&cluster).await;
    let f = ops.create(&creds(), d0, "f", 0o644).await.unwrap();

    cluster.target(T1).inject_fault("rename", NamespaceCode::BUSY);
    let err = ops.rename(&creds(), d0, "f", d1, "g").await.unwrap_err();
    match &err {
        NamespaceError::PartialCompletion {
            op,
            phase,
            completed_on,
            failed_on,
            ..
        } => {
            assert_eq!(*op, "rename");
            assert_eq!(*phase, "insert_target");
            assert_eq!(*completed_on, T0);
            assert_eq!(*failed_on, T1);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(err.status_code(), Some(NamespaceCode::BUSY));

    // The source name is gone and the object has no name anywhere.
    assert!(cluster.target(T0).entry_names(d0).is_empty());
    assert!(cluster.target(T1).entry_names(d1).is_empty());
    assert!(cluster.target(T0).contains(f.fid));
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_cross_target_link_and_rollback() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (_, d1) = split_dirs(&cluster).await;
    let f = ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap();

    cluster.target(T1).inject_fault("link", NamespaceCode::BUSY);
    let err = ops.link(&creds(), f.fid, d1, "l").await.unwrap_err();
    assert!(matches!(err, NamespaceError::Rejected { target: T1, .. }), "{err}");
    assert!(cluster.target(T1).entry_names(d1).is_empty());
    assert_eq!(ops.getattr(&creds(), f.fid).await.unwrap().nlink, 1);

    let linked = ops.link(&creds(), f.fid, d1, "l").await.unwrap();
    assert_eq!(linked.nlink, 2);
    assert_eq!(ops.lookup(&creds(), d1, "l").await.unwrap().fid, f.fid);

    // Removing the remote name drops the reference on target 0.
    ops.unlink(&creds(), d1, "l").await.unwrap();
    assert_eq!(ops.getattr(&creds(), f.fid).await.unwrap().nlink, 1);
    assert!(cluster.data.requests().is_empty());
    ops.unlink(&creds(), ROOT_FID, "f").await.unwrap();
    assert_eq!(cluster.data.requests(), vec![f.fid]);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_rmdir_of_remote_directory() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (_, d1) = split_dirs(&cluster).await;
    ops.create(&creds(), d1, "f", 0o644).await.unwrap();

    let err = ops.rmdir(&creds(), ROOT_FID, "d1").await.unwrap_err();
    assert_eq!(err.status_code(), Some(NamespaceCode::NOT_EMPTY));

    ops.unlink(&creds(), d1, "f").await.unwrap();
    assert_eq!(ops.rmdir(&creds(), ROOT_FID, "d1").await.unwrap(), d1);
    assert!(!cluster.target(T1).contains(d1));
    assert_eq!(cluster.target(T0).entry_names(ROOT_FID), vec!["d0".to_string()]);

    ops.rmdir(&creds(), ROOT_FID, "d0").await.unwrap();
    ops.create(&creds(), ROOT_FID, "plain", 0o644).await.unwrap();
    let err = ops.rmdir(&creds(), ROOT_FID, "plain").await.unwrap_err();
    assert_eq!(err.status_code(), Some(NamespaceCode::NOT_DIRECTORY));
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_rmdir_follows_name_changed_before_locking() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (_, d1) = split_dirs(&cluster).await;
    ops.create(&creds(), d1, "f", 0o644).await.unwrap();
    let e = ops.mkdir(&creds(), ROOT_FID, "e", 0o755).await.unwrap();
    assert!(cluster.target(T0).contains(e.fid));
    assert_eq!(ops.lookup(&creds(), ROOT_FID, "e").await.unwrap().fid, e.fid);

    // Another node moves the non-empty remote directory onto "e" while
    // this node still has the old entry cached.
    cluster
        .target(T0)
        .rename(RenameReq {
            ctx: OpContext {
                fid1: ROOT_FID,
                fid2: ROOT_FID,
                name: "d1".into(),
                ..Default::default()
            },
            new_name: "e".into(),
            phase: RenamePhase::Local,
        })
        .await
        .unwrap();
    assert_eq!(ops.cache().lookup_entry(ROOT_FID, "e"), Some(e.fid));

    let err = ops.rmdir(&creds(), ROOT_FID, "e").await.unwrap_err();
    assert!(matches!(err, NamespaceError::Rejected { target: T1, .. }), "{err}");
    assert_eq!(err.status_code(), Some(NamespaceCode::NOT_EMPTY));
    assert_eq!(
        cluster.target(T0).entry_names(ROOT_FID),
        vec!["d0".to_string(), "e".to_string()]
    );
    assert_eq!(cluster.target(T1).entry_names(d1), vec!["f".to_string()]);
    assert_eq!(ops.lookup(&creds(), ROOT_FID, "e").await.unwrap().fid, d1);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_retry_policy_follows_idempotency() {
    let cluster = Cluster::start(config(1, DirPlacement::Parent)).await;
    let ops = cluster.manager.ops().unwrap();
    let t0 = cluster.target(T0);
    let f = ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap();
    assert_eq!(t0.call_count("create"), 1);

    // A lookup may be re-sent after a timeout.
    ops.cache().clear();
    t0.inject_fault("lookup", RPCCode::TIMEOUT);
    assert_eq!(ops.lookup(&creds(), ROOT_FID, "f").await.unwrap().fid, f.fid);
    assert_eq!(t0.call_count("lookup"), 2);

    // A create whose delivery is unknown is not.
    t0.inject_fault("create", RPCCode::TIMEOUT);
    let err = ops.create(&creds(), ROOT_FID, "g", 0o644).await.unwrap_err();
    assert!(matches!(err, NamespaceError::RemoteUnavailable { target: T0, .. }));
    assert_eq!(t0.call_count("create"), 2);

    // One that never left this node is.
    t0.inject_fault("create", RPCCode::SEND_FAILED);
    ops.create(&creds(), ROOT_FID, "g", 0o644).await.unwrap();
    assert_eq!(t0.call_count("create"), 4);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_lock_manager_is_retried() {
    let locks = Arc::new(MockLockManager::new());
    let cluster = Cluster::join(
        Arc::new(MemConnector::default()),
        locks.clone(),
        config(1, DirPlacement::Parent),
        0,
    )
    .await;
    let ops = cluster.manager.ops().unwrap();

    let failures = Arc::new(AtomicUsize::new(2));
    {
        let failures = failures.clone();
        locks.on_enqueue(move |_| {
            let left = failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            });
            match left {
                Ok(_) => make_error(RPCCode::CONNECT_FAILED),
                Err(_) => Ok(()),
            }
        });
    }
    let before = locks.enqueued().len();
    assert!(ops.getattr(&creds(), ROOT_FID).await.unwrap().is_dir());
    assert_eq!(locks.enqueued().len(), before + 3);

    // Never reachable: gives up after the configured attempts.
    locks.on_enqueue(|_| make_error(RPCCode::CONNECT_FAILED));
    let before = locks.enqueued().len();
    let err = ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap_err();
    assert!(
        matches!(err, NamespaceError::Lock(LockError::Remote { target: T0, .. })),
        "{err}"
    );
    assert_eq!(locks.enqueued().len(), before + 3);
    assert!(!cluster.target(T0).entry_names(ROOT_FID).contains(&"f".to_string()));
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_renames_do_not_deadlock() {
    let cluster = Cluster::start(config(1, DirPlacement::RoundRobin)).await;
    let ops = cluster.manager.ops().unwrap();
    let (d0, d1) = split_dirs(&cluster).await;
    for i in 0..16 {
        ops.create(&creds(), d0, &format!("a{i}"), 0o644).await.unwrap();
        ops.create(&creds(), d1, &format!("b{i}"), 0o644).await.unwrap();
    }

    let forward = {
        let manager = cluster.manager.clone();
        tokio::spawn(async move {
            let ops = manager.ops()?;
            for i in 0..16 {
                ops.rename(&creds(), d0, &format!("a{i}"), d1, &format!("x{i}"))
                    .await?;
            }
            Ok::<_, NamespaceError>(())
        })
    };
    let backward = {
        let manager = cluster.manager.clone();
        tokio::spawn(async move {
            let ops = manager.ops()?;
            for i in 0..16 {
                ops.rename(&creds(), d1, &format!("b{i}"), d0, &format!("y{i}"))
                    .await?;
                ops.link(&creds(), ROOT_FID, d0, &format!("z{i}"))
                    .await
                    .unwrap_err();
            }
            Ok::<_, NamespaceError>(())
        })
    };

    let (forward, backward) = tokio::time::timeout(Duration::from_secs(20), async {
        (forward.await, backward.await)
    })
    .await
    .expect("renames deadlocked");
    forward.unwrap().unwrap();
    backward.unwrap().unwrap();

    assert_eq!(cluster.target(T0).entry_names(d0).len(), 16);
    assert_eq!(cluster.target(T1).entry_names(d1).len(), 16);
    assert!(cluster
        .target(T1)
        .entry_names(d1)
        .iter()
        .all(|n| n.starts_with('x')));
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_lock_revocation_invalidates_peer_cache() {
    let connector = Arc::new(MemConnector::default());
    let locks = Arc::new(LocalLockManager::new());
    let a = Cluster::join(
        connector.clone(),
        locks.clone(),
        config(1, DirPlacement::Parent),
        0,
    )
    .await;
    let b = Cluster::join(connector, locks, config(2, DirPlacement::Parent), 1).await;
    let a_ops = a.manager.ops().unwrap();
    let b_ops = b.manager.ops().unwrap();

    let f = b_ops.create(&creds(), ROOT_FID, "f", 0o644).await.unwrap();
    assert_eq!(a_ops.lookup(&creds(), ROOT_FID, "f").await.unwrap().fid, f.fid);
    assert_eq!(a_ops.cache().lookup_entry(ROOT_FID, "f"), Some(f.fid));

    // b's exclusive lock on the root revokes a's cached lookup lock.
    b_ops.create(&creds(), ROOT_FID, "g", 0o644).await.unwrap();
    assert_eq!(a_ops.cache().lookup_entry(ROOT_FID, "f"), None);
    assert!(a.manager.locks().held_bits(ROOT_FID).is_empty());

    let g = a_ops.lookup(&creds(), ROOT_FID, "g").await.unwrap();
    assert!(is_reg(g.mode));

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn test_nodes_allocate_disjoint_identifiers() {
    let connector = Arc::new(MemConnector::default());
    let locks = Arc::new(LocalLockManager::new());
    let a = Cluster::join(
        connector.clone(),
        locks.clone(),
        config(1, DirPlacement::Parent),
        0,
    )
    .await;
    let b = Cluster::join(connector, locks, config(2, DirPlacement::Parent), 1).await;
    let a_ops = a.manager.ops().unwrap();
    let b_ops = b.manager.ops().unwrap();

    let mut seen = HashSet::new();
    for i in 0..8 {
        let from_a = a_ops
            .create(&creds(), ROOT_FID, &format!("a{i}"), 0o644)
            .await
            .unwrap();
        let from_b = b_ops
            .create(&creds(), ROOT_FID, &format!("b{i}"), 0o644)
            .await
            .unwrap();
        assert!(seen.insert(from_a.fid));
        assert!(seen.insert(from_b.fid));
    }
    assert!(seen.iter().all(|fid| a.target(T0).contains(*fid)));
    assert_eq!(a.target(T0).entry_names(ROOT_FID).len(), 16);

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cleanup_waits_for_inflight_refs() {
    let cluster = Cluster::start(config(1, DirPlacement::Parent)).await;
    let held = cluster.manager.registry().find(T1).unwrap();

    let cleanup = {
        let manager = cluster.manager.clone();
        tokio::spawn(async move { manager.process_config(ConfigEvent::Cleanup).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.manager.state(), ManagerState::ShuttingDown);
    assert!(!cleanup.is_finished());
    assert!(cluster.manager.ops().is_err());
    assert!(held.is_draining());

    drop(held);
    cleanup.await.unwrap().unwrap();
    assert_eq!(cluster.manager.state(), ManagerState::Closed);
    assert_eq!(cluster.connector.live_connections(T0), 0);
    assert_eq!(cluster.connector.live_connections(T1), 0);
}

#[tokio::test]
async fn test_root_get_only_on_master() {
    let connector = Arc::new(MemConnector::default());
    let locks = Arc::new(LocalLockManager::new());
    let master = Cluster::join(
        connector.clone(),
        locks.clone(),
        config(1, DirPlacement::Parent),
        0,
    )
    .await;
    let other = Cluster::join(connector, locks, config(2, DirPlacement::Parent), 1).await;

    assert_eq!(master.manager.ops().unwrap().root_get().await.unwrap(), ROOT_FID);
    assert!(matches!(
        other.manager.ops().unwrap().root_get().await,
        Err(NamespaceError::InvalidArgument(_))
    ));

    let statfs = other.manager.ops().unwrap().statfs().await.unwrap();
    assert_eq!(statfs.files, 0);
    let maxsize = master.manager.ops().unwrap().get_maxsize().await.unwrap();
    assert!(maxsize.md_size > 0);

    other.shutdown().await;
    master.shutdown().await;
}

#[tokio::test]
async fn test_partition_table_follows_targets() {
    let cluster = Cluster::start(config(1, DirPlacement::Parent)).await;
    let locator = cluster.manager.locator();
    assert!(matches!(
        locator.detach_target(T1),
        Err(FldError::NotDrained { target: T1 })
    ));
    assert_eq!(locator.resolve(ROOT_FID).unwrap(), T0);

    locator.mark_down(T0).unwrap();
    let ops = cluster.manager.ops().unwrap();
    let err = ops.getattr(&creds(), ROOT_FID).await.unwrap_err();
    assert!(matches!(err, NamespaceError::StaleMapping { target: T0, .. }));
    locator.mark_up(T0).unwrap();
    assert!(ops.getattr(&creds(), ROOT_FID).await.unwrap().is_dir());

    cluster.manager.remove_target(T1).await.unwrap();
    assert_eq!(cluster.manager.registry().indices(), vec![T0]);
    cluster.shutdown().await;
}

#[tokio::test]
#[cfg_attr(debug_assertions, should_panic(expected = "duplicate identifier"))]
async fn test_duplicate_identifier_is_refused() {
    let fids = Arc::new(MockFidAllocator::new(0));
    fids.on_allocate(|_| Ok(Fid::new(0x2_0000_0000, 5)));
    let manager = NamespaceManager::new(
        config(1, DirPlacement::Parent),
        Collaborators {
            connector: Arc::new(MemConnector::default()),
            lock_manager: Arc::new(LocalLockManager::new()),
            fids: Some(fids),
            data: Arc::new(MemDataObjectStore::new()),
        },
    );
    manager
        .process_config(ConfigEvent::Setup {
            local_ordinal: NodeOrdinal(0),
        })
        .await
        .unwrap();
    manager.add_target(T0, "mem://mdt0").await.unwrap();
    let ops = manager.ops().unwrap();

    ops.create(&creds(), ROOT_FID, "a", 0o644).await.unwrap();
    let err = ops.create(&creds(), ROOT_FID, "b", 0o644).await.unwrap_err();
    assert!(matches!(err, NamespaceError::InternalInconsistency(_)));
    manager.process_config(ConfigEvent::Cleanup).await.unwrap();
}
