//! Demo/self-check harness: exercises `ShardCore` against a real
//! directory-backed `DemoChild`, walking through the composite write,
//! read, truncate and unlink operations end to end.

use shardfs_core::child::demo::DemoChild;
use shardfs_core::config::{Config, ConfigTrait};
use shardfs_core::dict::{Dict, Value};
use shardfs_core::ops;
use shardfs_core::remove;
use shardfs_core::resolve::RequestFlags;
use shardfs_core::shutdown::GracefulShutdown;
use shardfs_core::translator::ShardCore;
use shardfs_core::xdata;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const CONFIG_PATH: &str = "cfg/shardfs.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/shardfs.cfg.local.yaml";

/// shardfs-core demo - exercises the sharding translator core against a
/// directory-backed collaborator.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,

    /// Directory the demo child stores its files under. Defaults to a
    /// fresh directory under the OS temp dir.
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,
}

fn set_max_num_cpus(cfg: &Config) {
    let cores = cfg.runtime().num_cpus;
    if cores == 0 {
        let cores = num_cpus::get();
        info!(component = "main", event = "num_cpus_configured", num_cpus = cores, "available cores configured (using all available cores)");
    } else {
        info!(component = "main", event = "num_cpus_configured", num_cpus = cores, "available cores configured");
    }
}

/// Loads configuration from YAML, trying the local override first, then
/// the default path, then falling back to an in-memory default so the
/// demo runs without requiring a config file on disk.
fn load_cfg(path: Option<PathBuf>) -> Result<Config> {
    if let Some(custom_path) = path {
        return Config::load(&custom_path)
            .with_context(|| format!("failed to load custom config from {:?}", custom_path));
    }

    if let Ok(cfg) = Config::load(PathBuf::from(CONFIG_PATH_LOCAL)) {
        info!(component = "config", event = "load_success", path = CONFIG_PATH_LOCAL, "config loaded");
        return Ok(cfg);
    }
    if let Ok(cfg) = Config::load(PathBuf::from(CONFIG_PATH)) {
        info!(component = "config", event = "load_success", path = CONFIG_PATH, "config loaded");
        return Ok(cfg);
    }

    info!(component = "config", event = "default_fallback", "no config file found, using in-memory default");
    Ok(Config::default_for_tests())
}

fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg.logs().and_then(|logs| logs.level.as_ref()).map(|s| s.as_str()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().pretty()).init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tokio::runtime::Runtime::new().context("failed to create tokio runtime")?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    let cfg = load_cfg(args.cfg)?;
    configure_logger(&cfg);
    set_max_num_cpus(&cfg);

    let root = args.root.unwrap_or_else(|| std::env::temp_dir().join(format!("shardfs-core-demo-{}", std::process::id())));
    tokio::fs::create_dir_all(&root).await.with_context(|| format!("create demo root {:?}", root))?;
    info!(component = "main", event = "demo_root", root = ?root, "demo child rooted here");

    let graceful_shutdown = GracefulShutdown::new(shutdown_token.clone());
    graceful_shutdown.set_graceful_timeout(Duration::from_secs(10)).await;
    graceful_shutdown.add(1);

    let child = Arc::new(DemoChild::new(root));
    let core = Arc::new(ShardCore::new(child, cfg));

    let demo_shutdown = shutdown_token.clone();
    let demo_done = graceful_shutdown.clone();
    tokio::task::spawn(async move {
        if let Err(e) = run_demo(core).await {
            error!(component = "main", scope = "demo", event = "failed", error = %e, "demo scenario failed");
        }
        demo_shutdown.cancel();
        demo_done.done();
    });

    if let Err(e) = graceful_shutdown.await_shutdown().await {
        error!(component = "main", scope = "service", event = "graceful_shutdown_failed", error = %e, "failed to gracefully shut down service");
        return Err(e);
    }

    Ok(())
}

/// Creates a base file already tagged as sharded (block-size xattr plus
/// a zeroed file-size xattr), as a higher translator would on create.
async fn create_sharded_base(core: &ShardCore, path: &Path, block_size: u64) -> shardfs_core::error::Result<()> {
    let xdata = Dict::new(1);
    xdata.set(shardfs_core::xdata::XATTR_BLOCK_SIZE, Value::uint64(block_size));
    core.child.mknod(path, 0o644, 0, &xdata).await?;
    core.child.xattrop_add_array(path, xdata::XATTR_FILE_SIZE, &[0, 0, 0, 0]).await
}

async fn run_demo(core: Arc<ShardCore>) -> shardfs_core::error::Result<()> {
    let path = Path::new("/greeting.txt");
    const BLOCK_SIZE: u64 = 64;

    create_sharded_base(&core, path, BLOCK_SIZE).await?;
    info!(component = "demo", event = "created", path = %path.display(), block_size = BLOCK_SIZE, "sharded base file created");

    ops::write(&core, path, 0, b"hello from the first block", RequestFlags::default()).await?;
    info!(component = "demo", event = "write", offset = 0, "wrote within the first block");

    ops::write(&core, path, BLOCK_SIZE, b"and this spills into a shard", RequestFlags::default()).await?;
    info!(component = "demo", event = "write", offset = BLOCK_SIZE, "wrote past the first block, creating a shard");

    let base = core.refresh_base(path).await?;
    info!(component = "demo", event = "stat", logical_size = base.logical_size, "logical size after writes");

    let out = ops::read(&core, path, 0, base.logical_size, RequestFlags::default()).await?;
    info!(component = "demo", event = "read", bytes = out.len(), content = %String::from_utf8_lossy(&out), "read back full content");

    ops::truncate(&core, path, 10, RequestFlags::default()).await?;
    let base = core.refresh_base(path).await?;
    info!(component = "demo", event = "truncate", logical_size = base.logical_size, "truncated back into the first block, shard reclaimed");

    remove::unlink(&core, path).await?;
    info!(component = "demo", event = "unlink", "base file removed, shard deletion queued in the background");

    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(component = "demo", event = "done", "demo scenario complete");
    Ok(())
}
