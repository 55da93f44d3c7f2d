//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "asyncmem")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        name = "stress",
        about = "Manage payloads under a small capacity and read them concurrently"
    )]
    Stress(StressArgs),
}

#[derive(Parser, Debug)]
pub struct StressArgs {
    #[arg(short, long, default_value_t = 200, help = "Number of payloads to manage")]
    pub objects: usize,

    #[arg(short, long, default_value_t = 8, help = "Number of concurrent reader tasks")]
    pub readers: usize,

    #[arg(short, long, help = "Eviction threshold in estimated bytes")]
    pub capacity: Option<u64>,

    #[arg(short, long, help = "Store evicted payloads as files under this directory")]
    pub dir: Option<PathBuf>,

    #[arg(long, help = "TOML file with capacity, initial_size and candle_pool_size")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Print the final snapshot as JSON")]
    pub json: bool,
}

mod stress;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Stress(args) => stress::execute(args).await,
    }
}
