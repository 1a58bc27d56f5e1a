// src/main.rs
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crab_ds::{config, Engine};

#[derive(Parser, Debug)]
#[command(name = "crab-ds", version, about = "data structure engine on top of sled")]
struct Args {
    /// JSON 配置文件路径，不存在时会写入一份默认配置
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = config::load(&args.config)
        .with_context(|| format!("failed to load config from {:?}", args.config))?;
    let db = sled::open(&cfg.data_dir)
        .with_context(|| format!("failed to open sled db at {:?}", cfg.data_dir))?;
    let engine = Engine::open(&db, cfg).context("failed to open engine")?;

    // 过期清理、GC、list 转换，只有拿到租约的进程才真正执行
    let jobs = engine.spawn_background();

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    jobs.shutdown();
    engine.storage().flush().context("failed to flush storage")?;
    Ok(())
}
