//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 淘汰与重新加载集成测试

use crate::common::{manager_with, FlowDelays, Sample, SizedSerializer};
use asyncmem::{AsyncHandle, CacheConfig, ManagementState};
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

fn delays() -> std::sync::Arc<FlowDelays> {
    FlowDelays::new(&[
        ("far", Duration::from_secs(10)),
        ("near", Duration::from_secs(1)),
        ("later", Duration::from_secs(60)),
    ])
}

#[tokio::test]
async fn test_obsoleted_evicted_before_far_hot_time() {
    let (manager, persistence) = manager_with(CacheConfig::new(2, 10), delays());

    let done = manager
        .manage("near", Some(Sample::new("done", 2)), SizedSerializer)
        .unwrap();
    done.finish().await.unwrap();

    let far = manager
        .manage("far", Some(Sample::new("far", 3)), SizedSerializer)
        .unwrap();
    let far_handle = far.as_async();
    far.finish().await.unwrap();

    let near = manager
        .manage("near", Some(Sample::new("near", 4)), SizedSerializer)
        .unwrap();
    let near_handle = near.as_async();
    near.finish().await.unwrap();
    assert_eq!(manager.used_size(), 9);

    // 已废弃的对象优先，且不写入持久化后端
    assert!(manager.sweep_once().await.unwrap());
    assert_eq!(manager.metrics().retired, 1);
    assert_eq!(persistence.store_calls(), 0);
    assert_eq!(manager.used_size(), 7);

    // 下一次访问更晚的对象先被淘汰
    assert!(manager.sweep_once().await.unwrap());
    assert_eq!(persistence.stored_keys(), vec![far_handle.key()]);
    assert_eq!(far_handle.state(), ManagementState::None);
    assert!(!far_handle.is_loaded());
    assert_eq!(near_handle.state(), ManagementState::Managing);
    assert_eq!(manager.used_size(), 4);

    assert!(manager.sweep_once().await.unwrap());
    assert_eq!(
        persistence.stored_keys(),
        vec![far_handle.key(), near_handle.key()]
    );
    assert_eq!(manager.used_size(), 0);
    assert_eq!(manager.resident_count(), 0);

    // 没有常驻对象时推迟
    assert!(!manager.sweep_once().await.unwrap());
    assert_eq!(manager.metrics().sweep_deferred, 1);

    far_handle.dispose().await.unwrap();
    near_handle.dispose().await.unwrap();
    manager.shutdown().await.unwrap();
    assert_eq!(persistence.len(), 0);
}

#[tokio::test]
async fn test_capacity_triggers_sweep_on_finish() {
    let (manager, persistence) =
        manager_with(CacheConfig::new(2, 10).with_capacity(10), delays());

    let mut handles = Vec::new();
    for (flow, name) in [("near", "a"), ("later", "b"), ("near", "c")] {
        let setup = manager
            .manage(flow, Some(Sample::new(name, 4)), SizedSerializer)
            .unwrap();
        handles.push(setup.as_async());
        setup.finish().await.unwrap();
    }

    // 12 > 10，预测最晚访问的 b 被淘汰
    assert_eq!(manager.used_size(), 8);
    assert_eq!(manager.metrics().evicted, 1);
    assert_eq!(persistence.stored_keys(), vec![handles[1].key()]);
    assert!(manager.verify_candles().await.unwrap());

    for handle in handles {
        handle.dispose().await.unwrap();
    }
    assert_eq!(manager.used_size(), 0);
    assert_eq!(persistence.len(), 0);
}

#[tokio::test]
async fn test_access_rematerializes_evicted_payload() {
    let (manager, persistence) = manager_with(CacheConfig::new(1, 4), delays());
    let setup = manager
        .manage("far", Some(Sample::new("payload", 5)), SizedSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();

    handle
        .apply(|s: &mut Sample| s.values = vec![42])
        .await
        .unwrap();
    assert!(manager.sweep_once().await.unwrap());
    assert!(!handle.is_loaded());
    assert_eq!(manager.used_size(), 0);
    assert!(persistence.contains(&handle.key()));

    // 修改在淘汰后保留
    let values = handle.supply(|s: &Sample| s.values.clone()).await.unwrap();
    assert_eq!(values, vec![42]);
    assert_eq!(persistence.load_calls(), 1);
    assert_eq!(handle.state(), ManagementState::Managing);
    assert_eq!(manager.used_size(), 5);
    assert_eq!(manager.metrics().rematerialized, 1);
    // 重新加载后删除旧副本
    assert!(!persistence.contains(&handle.key()));
    assert_eq!(persistence.removed_keys(), vec![handle.key()]);

    // 已在内存中时不会再次加载
    handle.supply(|s: &Sample| s.name.len()).await.unwrap();
    assert_eq!(persistence.load_calls(), 1);

    handle.dispose().await.unwrap();
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disposing_evicted_object_removes_stored_copy() {
    let (manager, persistence) = manager_with(CacheConfig::default(), delays());
    let setup = manager
        .manage("far", Some(Sample::new("gone", 3)), SizedSerializer)
        .unwrap();
    let handle = setup.as_async();
    setup.finish().await.unwrap();

    assert!(manager.sweep_once().await.unwrap());
    let key = handle.key();
    assert!(persistence.contains(&key));

    handle.dispose().await.unwrap();
    assert!(!persistence.contains(&key));
    assert_eq!(manager.metrics().retired, 1);
    assert_eq!(manager.used_size(), 0);
}

#[tokio::test]
async fn test_accounting_matches_resident_objects() {
    let (manager, _) = manager_with(CacheConfig::new(3, 30).with_capacity(40), delays());
    let flows = ["near", "far", "later"];

    let mut handles: Vec<(AsyncHandle<Sample>, u64)> = Vec::new();
    for i in 0..24u64 {
        let size = i % 7 + 1;
        let setup = manager
            .manage(
                flows[(i % 3) as usize],
                Some(Sample::new(&format!("obj-{}", i), size)),
                SizedSerializer,
            )
            .unwrap();
        handles.push((setup.as_async(), size));
        setup.finish().await.unwrap();
    }

    for (i, (handle, _)) in handles.iter().enumerate() {
        if i % 4 == 0 {
            handle.supply(|s: &Sample| s.size).await.unwrap();
        }
    }

    let mut remaining = Vec::new();
    for (i, entry) in handles.into_iter().enumerate() {
        if i % 3 == 0 {
            entry.0.dispose().await.unwrap();
        } else {
            remaining.push(entry);
        }
    }

    let resident: u64 = remaining
        .iter()
        .filter(|(handle, _)| handle.state() == ManagementState::Managing)
        .map(|(_, size)| *size)
        .sum();
    assert_eq!(manager.used_size(), resident);
    assert!(manager.used_size() <= 40);
    assert!(manager.verify_candles().await.unwrap());

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(
        snapshot.candle_sizes.iter().sum::<usize>(),
        manager.resident_count()
    );

    for (handle, _) in remaining {
        handle.dispose().await.unwrap();
    }
    assert_eq!(manager.used_size(), 0);
    assert_eq!(manager.resident_count(), 0);
}
