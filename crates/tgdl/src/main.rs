use std::sync::Arc;

use anyhow::Context;

use tgdl_core::config::Config;
use tgdl_mtproto::{MtprotoSource, UserSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load()?);
    tgdl_core::logging::init("tgdl", &cfg.log_file)?;
    tracing::info!(api_id = cfg.api_id, "starting tgdl");

    std::fs::create_dir_all(&cfg.download_dir)
        .with_context(|| format!("creating {}", cfg.download_dir.display()))?;

    let session = UserSession::connect(cfg.api_id, &cfg.session_string)
        .await
        .context("starting user session")?;
    let source = Arc::new(MtprotoSource::new(session));

    tgdl_telegram::router::run_polling(cfg, source.clone(), source)
        .await
        .context("telegram bot failed")?;

    Ok(())
}
