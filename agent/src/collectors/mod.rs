//! Samplers for the mounted host views and the snapshot they compose into.
//!
//! Every sampler is total: failures are logged and encoded in the returned
//! values (zeros, `null`, `exists: false`), never raised.

use anyhow::Result;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod cpu;
pub mod disk;
mod error;
pub mod mem;
mod parse;
pub mod proc;

pub use cpu::CpuSnapshot;
pub use disk::{DiskEntry, DiskStats};
pub use error::SampleError;
pub use mem::MemorySnapshot;
pub use proc::ProcessEntry;

use crate::config::{Sources, StatsConfig};

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Snapshot {
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub disk: DiskStats,
    pub top_processes: Vec<ProcessEntry>,
}

/// Composes the four samplers over one set of [`Sources`].
///
/// Cheap to clone; clones share the same sources.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    sources: Arc<Sources>,
}

impl MetricsCollector {
    pub fn new(sources: Sources) -> Self {
        Self {
            sources: Arc::new(sources),
        }
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn cpu(&self) -> CpuSnapshot {
        cpu::collect(
            &self.sources.proc_root,
            Duration::from_millis(self.sources.cpu_sample_interval_ms),
        )
    }

    pub fn memory(&self) -> MemorySnapshot {
        mem::collect(&self.sources.proc_root)
    }

    pub fn disk(&self) -> DiskStats {
        disk::collect(&self.sources.host_root, &self.sources.disk_paths)
    }

    pub fn top_processes(&self, deadline: Option<Instant>) -> Vec<ProcessEntry> {
        proc::collect_until(
            &self.sources.proc_root,
            self.sources.top_n_procs,
            self.sources.page_size_bytes,
            deadline,
        )
    }

    /// Runs the samplers one after another on the calling thread.
    pub fn collect(&self) -> Snapshot {
        Snapshot {
            cpu: self.cpu(),
            memory: self.memory(),
            disk: self.disk(),
            top_processes: self.top_processes(None),
        }
    }

    /// Runs each sampler on the blocking pool, so the CPU interval overlaps
    /// the other reads.
    pub async fn collect_concurrent(&self) -> Snapshot {
        self.gather(None).await
    }

    /// [`collect_concurrent`](Self::collect_concurrent) bounded by `timeout`.
    ///
    /// Returns `None` if the snapshot is not ready in time. The process scan
    /// stops reading at the same deadline.
    pub async fn collect_within(&self, timeout: Duration) -> Option<Snapshot> {
        let deadline = Instant::now() + timeout;
        tokio::time::timeout(timeout, self.gather(Some(deadline)))
            .await
            .ok()
    }

    async fn gather(&self, deadline: Option<Instant>) -> Snapshot {
        let (c, m, d, p) = (self.clone(), self.clone(), self.clone(), self.clone());
        let (cpu, memory, disk, top_processes) = tokio::join!(
            offload("cpu", move || c.cpu()),
            offload("memory", move || m.memory()),
            offload("disk", move || d.disk()),
            offload("processes", move || p.top_processes(deadline)),
        );
        Snapshot {
            cpu,
            memory,
            disk,
            top_processes,
        }
    }
}

/// A sampler task that panicked degrades to that sampler's empty value.
async fn offload<T, F>(sampler: &'static str, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Default + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        error!(sampler, error = %e, "sampler task failed");
        T::default()
    })
}

#[derive(Debug, Serialize, Clone)]
pub struct TelemetryEnvelope<T: Serialize> {
    pub ts: String,
    pub event_id: String,
    pub instance_id: String,
    pub kind: String,
    pub body: T,
}

fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
}

/// Samples every `interval_secs` and logs each snapshot as one JSON line
/// until Ctrl-C.
pub async fn run_collect_loop(cfg: StatsConfig) -> Result<()> {
    let collector = MetricsCollector::new(cfg.sources.clone());
    let mut tick = tokio::time::interval(Duration::from_secs(cfg.common.interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        interval_secs = cfg.common.interval_secs,
        proc_root = %cfg.sources.proc_root.display(),
        host_root = %cfg.sources.host_root.display(),
        "starting collection loop"
    );
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let snap = collector.collect_concurrent().await;
                emit(&cfg.common.instance_id, "snapshot", &snap, cfg.common.max_event_bytes);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        }
    }
}

/// Serializes `body` in an envelope, or `None` if it exceeds `max_bytes`.
pub fn envelope_line<T: Serialize>(
    instance_id: &str,
    kind: &str,
    body: &T,
    max_bytes: usize,
) -> Option<String> {
    let env = TelemetryEnvelope {
        ts: now_iso(),
        event_id: Uuid::new_v4().to_string(),
        instance_id: instance_id.to_string(),
        kind: kind.to_string(),
        body,
    };
    match serde_json::to_string(&env) {
        Ok(line) if line.len() <= max_bytes => Some(line),
        Ok(line) => {
            warn!(event = %kind, size = line.len(), max_bytes, "telemetry event too large, dropped");
            None
        }
        Err(e) => {
            error!(event = %kind, error = %e, "telemetry serialization failed");
            None
        }
    }
}

fn emit<T: Serialize>(instance_id: &str, kind: &str, body: &T, max_bytes: usize) {
    if let Some(line) = envelope_line(instance_id, kind, body, max_bytes) {
        info!(event = %kind, size = line.len(), payload = %line, "telemetry");
    }
}
