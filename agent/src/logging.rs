use crate::config::StatsConfig;
use anyhow::{Context, Result};
use std::{fs, path::Path};
use tracing_appender::non_blocking::WorkerGuard;

pub const DEFAULT_FILTER: &str = "info,host_stats=info";

/// Installs the global JSON subscriber. Keep the returned guard alive until
/// exit, or buffered file output is lost.
pub fn init_tracing(cfg: &StatsConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into());
    match (cfg.output.mode.as_str(), &cfg.output.file_path) {
        ("file", Some(path)) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
            let name = path
                .file_name()
                .with_context(|| format!("log path {} has no file name", path.display()))?;
            let (nb, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(nb)
                .json()
                .flatten_event(true)
                .init();
            Ok(Some(guard))
        }
        ("stderr", _) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
            Ok(None)
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
            Ok(None)
        }
    }
}
