use super::{error::SampleError, parse::round1};
use serde::Serialize;
use std::{fs, path::Path, thread, time::Duration};
use tracing::error;

/// Aggregate counter file under the proc root.
pub const SOURCE: &str = "stat";

/// Position of the idle counter after the `cpu` label; io-wait follows it.
///
/// This is the Linux `/proc/stat` layout (user nice system idle iowait ...).
/// A first line that is not labelled `cpu` or carries fewer counters is
/// rejected rather than guessed at.
pub const IDLE_INDEX: usize = 3;
const MIN_COUNTERS: usize = IDLE_INDEX + 2;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Default)]
pub struct CpuSnapshot {
    pub pct: f64,
}

/// Samples the counters twice, `interval` apart, blocking the calling thread.
pub fn collect(proc_root: &Path, interval: Duration) -> CpuSnapshot {
    let path = proc_root.join(SOURCE);
    match measure(&path, interval) {
        Ok(pct) => CpuSnapshot { pct },
        Err(e) => {
            error!(path = %path.display(), error = %e, "CPU read failed");
            CpuSnapshot::default()
        }
    }
}

fn measure(path: &Path, interval: Duration) -> Result<f64, SampleError> {
    let before = read_counters(path)?;
    thread::sleep(interval);
    let after = read_counters(path)?;
    utilization(&before, &after)
}

fn read_counters(path: &Path) -> Result<Vec<u64>, SampleError> {
    let text = fs::read_to_string(path).map_err(|e| SampleError::unavailable(path, e))?;
    parse_counters(&text)
}

/// Reads the counters of the first (aggregate) line, label excluded.
pub fn parse_counters(text: &str) -> Result<Vec<u64>, SampleError> {
    let line = text
        .lines()
        .next()
        .ok_or_else(|| SampleError::parse("empty stat source"))?;
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some("cpu") => {}
        other => {
            return Err(SampleError::parse(format!(
                "expected aggregate `cpu` line, found {other:?}"
            )))
        }
    }
    let counters = fields
        .map(|f| {
            f.parse::<u64>()
                .map_err(|_| SampleError::parse(format!("non-numeric counter {f:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if counters.len() < MIN_COUNTERS {
        return Err(SampleError::parse(format!(
            "expected at least {MIN_COUNTERS} counters, found {}",
            counters.len()
        )));
    }
    Ok(counters)
}

/// Busy share of the ticks elapsed between two samples, idle and io-wait
/// both counting as idle.
pub fn utilization(before: &[u64], after: &[u64]) -> Result<f64, SampleError> {
    if before.len() != after.len() || before.len() < MIN_COUNTERS {
        return Err(SampleError::parse("counter layout differs between samples"));
    }
    let diff = before
        .iter()
        .zip(after)
        .map(|(a, b)| b.checked_sub(*a))
        .collect::<Option<Vec<u64>>>()
        .ok_or(SampleError::Degenerate("counter went backwards"))?;
    let total = diff
        .iter()
        .try_fold(0u64, |acc, d| acc.checked_add(*d))
        .ok_or(SampleError::Degenerate("tick total overflows"))?;
    if total == 0 {
        return Err(SampleError::Degenerate("no ticks elapsed between samples"));
    }
    let idle = diff[IDLE_INDEX]
        .checked_add(diff[IDLE_INDEX + 1])
        .ok_or(SampleError::Degenerate("idle ticks overflow"))?;
    Ok(round1(100.0 * (1.0 - idle as f64 / total as f64)))
}
