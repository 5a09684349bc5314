use super::{error::SampleError, parse::round1};
use nix::sys::statvfs::statvfs;
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::{
    io,
    ops::Index,
    path::{Path, PathBuf},
};
use tracing::{error, warn};

/// Usage of one configured mount label.
///
/// `used_pct` is `None` whenever usage could not be determined; `exists`
/// tells an absent path apart from a present one whose stats failed.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct DiskEntry {
    pub used_pct: Option<f64>,
    pub exists: bool,
}

impl DiskEntry {
    pub const ABSENT: Self = Self {
        used_pct: None,
        exists: false,
    };
    pub const UNMEASURED: Self = Self {
        used_pct: None,
        exists: true,
    };
}

/// Mount label as configured (e.g. `/mnt/data`) to its usage, in
/// configured order. Serializes as a JSON object keyed by label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats(Vec<(String, DiskEntry)>);

impl DiskStats {
    /// A label seen again keeps its first position and takes the new entry.
    pub fn insert(&mut self, label: String, entry: DiskEntry) {
        match self.0.iter_mut().find(|(l, _)| *l == label) {
            Some(slot) => slot.1 = entry,
            None => self.0.push((label, entry)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&DiskEntry> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DiskEntry)> {
        self.0.iter().map(|(l, e)| (l.as_str(), e))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(l, _)| l)
    }

    pub fn values(&self) -> impl Iterator<Item = &DiskEntry> {
        self.iter().map(|(_, e)| e)
    }
}

impl Index<&str> for DiskStats {
    type Output = DiskEntry;

    fn index(&self, label: &str) -> &DiskEntry {
        self.get(label)
            .unwrap_or_else(|| panic!("no disk entry for {label:?}"))
    }
}

impl FromIterator<(String, DiskEntry)> for DiskStats {
    fn from_iter<I: IntoIterator<Item = (String, DiskEntry)>>(iter: I) -> Self {
        let mut stats = Self::default();
        for (label, entry) in iter {
            stats.insert(label, entry);
        }
        stats
    }
}

impl Serialize for DiskStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (label, entry) in self.iter() {
            map.serialize_entry(label, entry)?;
        }
        map.end()
    }
}

pub fn collect(host_root: &Path, paths: &[String]) -> DiskStats {
    paths
        .iter()
        .map(|label| (label.clone(), sample_path(host_root, label)))
        .collect()
}

/// Maps a host-absolute label onto the mounted host root.
pub fn resolve(host_root: &Path, label: &str) -> PathBuf {
    host_root.join(label.trim_start_matches('/'))
}

fn sample_path(host_root: &Path, label: &str) -> DiskEntry {
    let full = resolve(host_root, label);
    if !full.exists() {
        warn!(path = %full.display(), "disk path not found, skipping");
        return DiskEntry::ABSENT;
    }
    match usage(&full) {
        Ok(pct) => DiskEntry {
            used_pct: Some(pct),
            exists: true,
        },
        Err(e) => {
            error!(path = %full.display(), error = %e, "disk read failed");
            DiskEntry::UNMEASURED
        }
    }
}

fn usage(path: &Path) -> Result<f64, SampleError> {
    let st = statvfs(path).map_err(|errno| SampleError::unavailable(path, io::Error::from(errno)))?;
    let frsize = u64::from(st.fragment_size());
    let total = u64::from(st.blocks()).saturating_mul(frsize);
    let free = u64::from(st.blocks_free()).saturating_mul(frsize);
    used_pct(total, free)
}

/// Share of `total` bytes not free, in percent.
pub fn used_pct(total: u64, free: u64) -> Result<f64, SampleError> {
    if total == 0 {
        return Err(SampleError::Degenerate("filesystem reports zero blocks"));
    }
    if free > total {
        return Err(SampleError::Degenerate("free blocks exceed total blocks"));
    }
    Ok(round1(100.0 * (1.0 - free as f64 / total as f64)))
}
