//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块是演示程序的入口点。

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    asyncmem::cli::run().await
}
