//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 持久化后端与错误传播集成测试

use crate::common::{
    manager_with, setup_logging, BrokenSerializer, FlowDelays, Sample, SizedSerializer,
};
use asyncmem::{
    AsyncMemManager, CacheConfig, CacheError, FilePersistence, FixedDelayCalculator,
    ManagementState, MemoryPersistence, Persistence,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

#[path = "../common/mod.rs"]
mod common;

#[tokio::test]
async fn test_file_persistence_operations() {
    let dir = TempDir::new().unwrap();
    let persistence = FilePersistence::new(dir.path().join("store")).unwrap();
    assert!(persistence.base_dir().exists());

    let key = Uuid::new_v4();
    persistence.store(key, b"first".to_vec()).await.unwrap();
    persistence.store(key, b"second".to_vec()).await.unwrap();
    assert_eq!(persistence.load(key).await.unwrap(), b"second");

    // 读取不删除
    assert_eq!(persistence.load(key).await.unwrap(), b"second");

    persistence.remove(key).await.unwrap();
    let err = persistence.load(key).await.unwrap_err();
    assert!(matches!(err, CacheError::Persistence(_)));

    // 删除不存在的键视为成功
    persistence.remove(Uuid::new_v4()).await.unwrap();
}

#[tokio::test]
async fn test_memory_persistence_missing_key() {
    let persistence = MemoryPersistence::new();
    let err = persistence.load(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CacheError::Persistence(_)));
    persistence.remove(Uuid::new_v4()).await.unwrap();
}

#[tokio::test]
async fn test_eviction_through_file_persistence() {
    setup_logging();
    let dir = TempDir::new().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()).unwrap());
    let manager = AsyncMemManager::new(
        CacheConfig::new(2, 4).with_capacity(6),
        Arc::new(FixedDelayCalculator::default()),
        persistence.clone(),
    );

    let mut handles = Vec::new();
    for i in 0..4u64 {
        let setup = manager
            .manage("files", Some(Sample::new(&format!("f{}", i), 3)), SizedSerializer)
            .unwrap();
        handles.push(setup.as_async());
        setup.finish().await.unwrap();
    }
    assert_eq!(manager.used_size(), 6);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

    for (i, handle) in handles.iter().enumerate() {
        let name = handle.supply(|s: &Sample| s.name.clone()).await.unwrap();
        assert_eq!(name, format!("f{}", i));
    }
    assert!(manager.used_size() <= 6);

    for handle in handles {
        handle.dispose().await.unwrap();
    }
    manager.shutdown().await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_store_failure_propagates_and_keeps_object_resident() {
    let (manager, persistence) = manager_with(CacheConfig::default(), FlowDelays::new(&[]));
    let setup = manager
        .manage("flow", Some(Sample::new("a", 5)), SizedSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();

    persistence.fail_store(true);
    let err = manager.sweep_once().await.unwrap_err();
    assert!(matches!(err, CacheError::Persistence(_)));
    assert_eq!(handle.state(), ManagementState::Managing);
    assert!(handle.is_loaded());
    assert_eq!(manager.used_size(), 5);
    assert!(manager.verify_candles().await.unwrap());

    persistence.fail_store(false);
    assert!(manager.sweep_once().await.unwrap());
    assert_eq!(manager.used_size(), 0);

    handle.dispose().await.unwrap();
}

#[tokio::test]
async fn test_serializer_failure_propagates() {
    let (manager, persistence) = manager_with(CacheConfig::default(), FlowDelays::new(&[]));
    let setup = manager
        .manage("flow", Some(Sample::new("a", 5)), BrokenSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();

    let err = manager.sweep_once().await.unwrap_err();
    assert!(matches!(err, CacheError::Serialization(_)));
    assert_eq!(persistence.store_calls(), 0);
    assert_eq!(handle.state(), ManagementState::Managing);
    assert_eq!(manager.used_size(), 5);

    handle.dispose().await.unwrap();
    assert_eq!(manager.used_size(), 0);
}

/// 扫描选中的对象无法序列化时，其他对象的操作不受影响
#[tokio::test]
async fn test_failing_candidate_does_not_break_other_handles() {
    let (manager, _) = manager_with(
        CacheConfig::new(1, 4).with_capacity(10),
        FlowDelays::new(&[
            ("cold", Duration::from_secs(60)),
            ("hot", Duration::from_secs(1)),
        ]),
    );

    let cold = manager
        .manage("cold", Some(Sample::new("cold", 3)), BrokenSerializer)
        .unwrap();
    let cold_handle = cold.as_async();
    cold.finish().await.unwrap();

    let hot = manager
        .manage("hot", Some(Sample::new("hot", 4)), SizedSerializer)
        .unwrap();
    let hot_handle = hot.as_async();
    hot.finish().await.unwrap();

    // 超出容量，扫描选中 cold 并失败，但 big 仍然完成放置
    let big = manager
        .manage("hot", Some(Sample::new("big", 2000)), SizedSerializer)
        .unwrap();
    let big_handle = big.as_async();
    big.finish().await.unwrap();
    assert_eq!(big_handle.state(), ManagementState::Managing);
    assert_eq!(manager.used_size(), 2007);

    hot_handle
        .apply(|s: &mut Sample| s.values.push(99))
        .await
        .unwrap();
    let last = hot_handle
        .supply(|s: &Sample| s.values.last().copied())
        .await
        .unwrap();
    assert_eq!(last, Some(99));
    assert!(manager.metrics().sweep_failed >= 3);

    // 直接扫描时仍能拿到错误
    let err = manager.sweep_once().await.unwrap_err();
    assert!(matches!(err, CacheError::Serialization(_)));
    assert_eq!(cold_handle.state(), ManagementState::Managing);

    cold_handle.dispose().await.unwrap();
    hot_handle.dispose().await.unwrap();
    big_handle.dispose().await.unwrap();
    assert_eq!(manager.used_size(), 0);
}

#[tokio::test]
async fn test_load_failure_propagates_to_handle_operation() {
    let (manager, persistence) = manager_with(CacheConfig::default(), FlowDelays::new(&[]));
    let setup = manager
        .manage("flow", Some(Sample::new("a", 5)), SizedSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();
    assert!(manager.sweep_once().await.unwrap());

    persistence.fail_load(true);
    let err = handle.supply(|s: &Sample| s.size).await.unwrap_err();
    assert!(matches!(err, CacheError::Persistence(_)));
    assert_eq!(handle.state(), ManagementState::None);
    assert_eq!(manager.used_size(), 0);

    persistence.fail_load(false);
    assert_eq!(handle.supply(|s: &Sample| s.size).await.unwrap(), 5);
    assert_eq!(manager.used_size(), 5);

    handle.dispose().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_collects_remove_failures() {
    let (manager, persistence) = manager_with(CacheConfig::new(2, 10), FlowDelays::new(&[]));
    for size in [1, 2, 3] {
        let setup = manager
            .manage("flow", Some(Sample::new("s", size)), SizedSerializer)
            .unwrap();
        setup.finish().await.unwrap();
    }

    persistence.fail_remove(true);
    let err = manager.shutdown().await.unwrap_err();
    match err {
        CacheError::ShutdownError(message) => assert_eq!(message.matches("injected").count(), 3),
        other => panic!("unexpected error: {}", other),
    }
    // 删除失败不影响清空
    assert_eq!(manager.used_size(), 0);
    assert_eq!(manager.resident_count(), 0);
}

#[tokio::test]
async fn test_shutdown_removes_copies_of_evicted_objects() {
    let (manager, persistence) = manager_with(CacheConfig::default(), FlowDelays::new(&[]));
    let setup = manager
        .manage("flow", Some(Sample::new("evicted", 4)), SizedSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();
    assert!(manager.sweep_once().await.unwrap());
    assert_eq!(persistence.len(), 1);

    manager.shutdown().await.unwrap();
    assert_eq!(persistence.len(), 0);
    assert_eq!(persistence.removed_keys(), vec![handle.key()]);

    let err = handle.supply(|s: &Sample| s.size).await.unwrap_err();
    assert!(matches!(err, CacheError::ShutdownError(_)));
    handle.dispose().await.unwrap();
}

/// 关闭与进行中的写入重叠时，关闭返回后不留下副本
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_store_leaves_no_copy() {
    let (manager, persistence) = manager_with(CacheConfig::default(), FlowDelays::new(&[]));
    let setup = manager
        .manage("flow", Some(Sample::new("slow", 4)), SizedSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();

    persistence.delay_store(Duration::from_millis(200));
    let sweep = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.sweep_once().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.shutdown().await.unwrap();
    assert_eq!(persistence.store_calls(), 1);
    assert_eq!(persistence.len(), 0);
    assert_eq!(manager.used_size(), 0);
    assert_eq!(manager.resident_count(), 0);

    assert!(sweep.await.unwrap().unwrap());
    assert_eq!(persistence.len(), 0);
    handle.dispose().await.unwrap();
}
