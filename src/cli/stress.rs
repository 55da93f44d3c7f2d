//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了压力演示命令的实现。

use crate::cli::StressArgs;
use crate::config::CacheConfig;
use crate::handle::AsyncHandle;
use crate::hot_time::AverageWaitCalculator;
use crate::manager::AsyncMemManager;
use crate::persistence::{FilePersistence, MemoryPersistence, Persistence};
use crate::serialization::JsonSerializer;
use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: u64,
    flow: String,
    values: Vec<u32>,
}

impl Record {
    fn new(id: u64, flows: u64) -> Self {
        Self {
            id,
            flow: format!("flow-{}", id % flows),
            values: (0..(id % 16 + 4) as u32).collect(),
        }
    }
}

async fn load_config(args: &StressArgs) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            CacheConfig::from_toml_str(&text)?
        }
        None => CacheConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    Ok(config)
}

pub async fn execute(args: &StressArgs) -> Result<()> {
    let config = load_config(args).await?;
    let persistence: Arc<dyn Persistence> = match &args.dir {
        Some(dir) => Arc::new(FilePersistence::new(dir)?),
        None => Arc::new(MemoryPersistence::new()),
    };
    let manager = AsyncMemManager::new(
        config,
        Arc::new(AverageWaitCalculator::new(Duration::from_millis(100))),
        persistence,
    );
    let sweeper = manager.start_sweeper(Duration::from_millis(50));
    let started = Instant::now();

    let mut handles: Vec<AsyncHandle<Record>> = Vec::with_capacity(args.objects);
    for id in 0..args.objects as u64 {
        let record = Record::new(id, 4);
        let flow = record.flow.clone();
        let Some(setup) = manager.manage(&flow, Some(record), JsonSerializer::new()) else {
            continue;
        };
        handles.push(setup.as_async());
        setup.finish().await?;
    }
    info!("Managed {} objects: {}", handles.len(), manager.debug_info());

    let handles = Arc::new(handles);
    let mut readers = Vec::with_capacity(args.readers);
    for reader in 0..args.readers {
        let handles = handles.clone();
        readers.push(tokio::spawn(async move {
            let mut total = 0u64;
            let count = handles.len();
            for step in 0..count {
                let index = (step * 7 + reader * 13) % count;
                let handle = &handles[index];
                total += handle
                    .supply(|record: &Record| record.values.iter().map(|&v| v as u64).sum::<u64>())
                    .await?;
                if step % 5 == 0 {
                    handle.apply(|record: &mut Record| record.values.reverse()).await?;
                }
            }
            Ok::<u64, crate::error::CacheError>(total)
        }));
    }

    let mut checksum = 0u64;
    for result in join_all(readers).await {
        checksum += result??;
    }
    info!("Readers finished: checksum={}, {}", checksum, manager.debug_info());

    let handles = Arc::try_unwrap(handles)
        .map_err(|_| anyhow::anyhow!("reader tasks still hold handles"))?;
    for handle in handles {
        handle.dispose().await?;
    }

    let snapshot = manager.snapshot().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("=== Stress Result ===\n");
        println!("Elapsed:        {:?}", started.elapsed());
        println!("Checksum:       {}", checksum);
        println!("Debug:          {}", manager.debug_info());
        println!("Managed:        {}", snapshot.metrics.managed);
        println!("Placed:         {}", snapshot.metrics.placed);
        println!("Evicted:        {}", snapshot.metrics.evicted);
        println!("Rematerialized: {}", snapshot.metrics.rematerialized);
        println!("Retired:        {}", snapshot.metrics.retired);
        println!("Sweep deferred: {}", snapshot.metrics.sweep_deferred);
        println!("Sweep failed:   {}", snapshot.metrics.sweep_failed);
    }

    manager.shutdown().await?;
    sweeper.await?;
    Ok(())
}
