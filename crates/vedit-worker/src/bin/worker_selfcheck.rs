use std::path::Path;

use vedit_queue::{RedisStageQueue, StageQueue};
use vedit_store::{JobStore, RedisJobStore};
use vedit_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={} media_root={}",
        config.work_dir.display(),
        config.media_root.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_dir_exists(&config.media_root)?;
    ensure_engine()?;
    ensure_env_present(&["REDIS_URL"])?;
    ensure_redis().await?;

    let stages: Vec<String> = config
        .served_stages()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("worker-selfcheck: serving {}", stages.join(","));
    match config.watermark.validate() {
        Ok(()) => println!(
            "worker-selfcheck: watermark at {}",
            config.watermark.image_path.display()
        ),
        Err(e) => println!("worker-selfcheck: {}, finalize will fail", e),
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_dir_exists(path: &Path) -> anyhow::Result<()> {
    if !path.is_dir() {
        return Err(anyhow::anyhow!("media root {} is not a directory", path.display()));
    }
    Ok(())
}

fn ensure_engine() -> anyhow::Result<()> {
    let ffmpeg = vedit_media::check_ffmpeg()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = vedit_media::check_ffprobe()
        .map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

async fn ensure_redis() -> anyhow::Result<()> {
    RedisStageQueue::from_env()?.ping().await?;
    RedisJobStore::from_env()?.ping().await?;
    Ok(())
}
