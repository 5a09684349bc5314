use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

pub const CONFIG_ENV: &str = "HOST_STATS_CONFIG";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub common: Common,
    pub sources: Sources,
    pub output: Output,
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Common {
    pub instance_id: String,
    pub interval_secs: u64,
    pub max_event_bytes: usize,
}

/// Where the samplers read from, and how much they keep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sources {
    /// Mounted view of the host's `/proc`.
    pub proc_root: PathBuf,
    /// Mounted view of the host's `/`, against which `disk_paths` resolve.
    pub host_root: PathBuf,
    pub disk_paths: Vec<String>,
    pub top_n_procs: usize,
    pub cpu_sample_interval_ms: u64,
    /// Converts the rss page count to bytes.
    pub page_size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    /// `stdout`, `stderr` or `file`.
    pub mode: String,
    pub file_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub bind: IpAddr,
    pub port: Option<u16>,
    pub collect_timeout_ms: u64,
}

impl Default for Common {
    fn default() -> Self {
        Self {
            instance_id: "host-stats".into(),
            interval_secs: 30,
            max_event_bytes: 128 * 1024,
        }
    }
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            proc_root: "/host/proc".into(),
            host_root: "/host/root".into(),
            disk_paths: vec!["/".into(), "/mnt/data".into()],
            top_n_procs: 10,
            cpu_sample_interval_ms: 200,
            page_size_bytes: 4096,
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        let pd = ProjectDirs::from("io", "host-stats", "host-stats")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| "./data".into());
        Self {
            mode: "stdout".into(),
            file_path: Some(pd.join("logs").join("host-stats.jsonl")),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: None,
            collect_timeout_ms: 5_000,
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.common.interval_secs > 0, "common.interval_secs must be positive");
        ensure!(
            self.sources.cpu_sample_interval_ms > 0,
            "sources.cpu_sample_interval_ms must be positive"
        );
        ensure!(self.sources.page_size_bytes > 0, "sources.page_size_bytes must be positive");
        ensure!(self.status.collect_timeout_ms > 0, "status.collect_timeout_ms must be positive");
        ensure!(
            matches!(self.output.mode.as_str(), "stdout" | "stderr" | "file"),
            "output.mode must be one of stdout, stderr, file (got {:?})",
            self.output.mode
        );
        Ok(())
    }
}

/// Defaults, then the config file (`cli` or `HOST_STATS_CONFIG`), then
/// `HOST_STATS_*` environment overrides.
pub fn load_config_with_precedence(cli: Option<&PathBuf>) -> Result<StatsConfig> {
    let mut cfg = StatsConfig::default();
    let path = cli.cloned().or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from));
    if let Some(p) = path {
        if p.exists() {
            cfg = merge_config(&cfg, &read_file(&p)?);
        }
    }
    apply_env_overrides(&mut cfg, |k| env::var(k).ok());
    Ok(cfg)
}

fn read_file(p: &Path) -> Result<StatsConfig> {
    let s = fs::read_to_string(p).with_context(|| format!("reading config file {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing config TOML {}", p.display()))
}

/// Applies `HOST_STATS_*` overrides; unparsable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut StatsConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("HOST_STATS_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        cfg.common.interval_secs = n;
    }
    if let Some(n) = var("HOST_STATS_TOP_N").and_then(|v| v.parse().ok()) {
        cfg.sources.top_n_procs = n;
    }
    if let Some(p) = var("HOST_STATS_PROC_ROOT") {
        cfg.sources.proc_root = p.into();
    }
    if let Some(p) = var("HOST_STATS_HOST_ROOT") {
        cfg.sources.host_root = p.into();
    }
}

pub fn merge_config(a: &StatsConfig, b: &StatsConfig) -> StatsConfig {
    let mut out = a.clone();
    out.common = b.common.clone();
    out.sources = b.sources.clone();
    out.output = b.output.clone();
    out.status = b.status.clone();
    out
}
