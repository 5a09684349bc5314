use super::{
    error::SampleError,
    parse::{digits_only, round1},
};
use serde::Serialize;
use std::{fs, path::Path};
use tracing::error;

/// File under the proc root holding the `Key: value unit` memory table.
pub const SOURCE: &str = "meminfo";

/// System memory in megabytes. All zeros means "could not be measured".
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Default)]
pub struct MemorySnapshot {
    pub total_mb: f64,
    pub used_mb: f64,
    pub pct: f64,
}

impl MemorySnapshot {
    /// A host never reports zero total memory, so this only holds for the sentinel.
    pub fn is_unavailable(&self) -> bool {
        self.total_mb == 0.0
    }
}

pub fn collect(proc_root: &Path) -> MemorySnapshot {
    let path = proc_root.join(SOURCE);
    match read(&path) {
        Ok(m) => m,
        Err(e) => {
            error!(path = %path.display(), error = %e, "memory read failed");
            MemorySnapshot::default()
        }
    }
}

fn read(path: &Path) -> Result<MemorySnapshot, SampleError> {
    let text = fs::read_to_string(path).map_err(|e| SampleError::unavailable(path, e))?;
    parse(&text)
}

/// Derives usage from `MemTotal` and `MemAvailable` of a single read.
///
/// Other keys are ignored. Both values are in kilobytes.
pub fn parse(text: &str) -> Result<MemorySnapshot, SampleError> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let slot = match key {
            "MemTotal" => &mut total,
            "MemAvailable" => &mut available,
            _ => continue,
        };
        let kb = digits_only(value)
            .ok_or_else(|| SampleError::parse(format!("{key} has no numeric value")))?;
        *slot = Some(kb);
    }
    let total: u64 = total.ok_or_else(|| SampleError::parse("MemTotal missing"))?;
    let available: u64 = available.ok_or_else(|| SampleError::parse("MemAvailable missing"))?;
    if total == 0 {
        return Err(SampleError::Degenerate("MemTotal is zero"));
    }
    let used = total
        .checked_sub(available)
        .ok_or(SampleError::Degenerate("MemAvailable exceeds MemTotal"))?;
    Ok(MemorySnapshot {
        total_mb: round1(total as f64 / 1024.0),
        used_mb: round1(used as f64 / 1024.0),
        pct: round1(used as f64 / total as f64 * 100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    const MEMINFO: &str = "MemTotal:        1048576 kB\n\
                           MemFree:          100000 kB\n\
                           MemAvailable:     524288 kB\n\
                           Buffers:           20000 kB\n\
                           HugePages_Total:       0\n";

    #[test]
    fn half_used_host() {
        let m = parse(MEMINFO).unwrap();
        assert_eq!(
            m,
            MemorySnapshot {
                total_mb: 1024.0,
                used_mb: 512.0,
                pct: 50.0
            }
        );
    }

    #[test]
    fn quarter_megabyte_totals_round_to_even() {
        let m = parse("MemTotal: 1048832 kB\nMemAvailable: 1048832 kB\n").unwrap();
        assert_eq!(m.total_mb, 1024.2);
        assert_eq!(m.used_mb, 0.0);
        assert_eq!(m.pct, 0.0);
        let m = parse("MemTotal: 1049344 kB\nMemAvailable: 0 kB\n").unwrap();
        assert_eq!(m.total_mb, 1024.8);
        assert_eq!(m.used_mb, 1024.8);
    }

    #[test]
    fn missing_available_is_a_parse_failure() {
        let err = parse("MemTotal: 2048 kB\nMemFree: 1024 kB\n").unwrap_err();
        assert!(matches!(err, SampleError::Parse(_)));
    }

    #[test]
    fn zero_total_is_degenerate() {
        let err = parse("MemTotal: 0 kB\nMemAvailable: 0 kB\n").unwrap_err();
        assert!(matches!(err, SampleError::Degenerate(_)));
    }

    #[test]
    fn available_above_total_is_degenerate() {
        let err = parse("MemTotal: 10 kB\nMemAvailable: 11 kB\n").unwrap_err();
        assert!(matches!(err, SampleError::Degenerate(_)));
    }

    #[test]
    fn value_without_digits_is_a_parse_failure() {
        let err = parse("MemTotal: kB\nMemAvailable: 1 kB\n").unwrap_err();
        assert!(matches!(err, SampleError::Parse(_)));
    }

    #[test]
    fn collect_reads_from_proc_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SOURCE), MEMINFO).unwrap();
        assert_eq!(collect(dir.path()).pct, 50.0);
    }

    #[test]
    fn collect_degrades_to_zero_when_source_is_missing() {
        let dir = tempdir().unwrap();
        let m = collect(dir.path());
        assert_eq!(m, MemorySnapshot::default());
        assert!(m.is_unavailable());
    }

    proptest! {
        #[test]
        fn used_plus_available_matches_total(total in 1u64..1 << 34, avail_frac in 0.0f64..=1.0) {
            let available = (total as f64 * avail_frac) as u64;
            let text = format!("MemTotal: {total} kB\nMemAvailable: {available} kB\n");
            let m = parse(&text).unwrap();
            let available_mb = available as f64 / 1024.0;
            prop_assert!((m.used_mb + available_mb - m.total_mb).abs() <= 0.11);
            prop_assert!((0.0..=100.0).contains(&m.pct));
        }
    }
}
