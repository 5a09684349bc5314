use super::{error::SampleError, parse::round1};
use glob::Pattern;
use serde::Serialize;
use std::{fs, path::Path, time::Instant};
use tracing::{debug, error, info, trace, warn};

/// Field index of `rss` (resident pages) in `/proc/<pid>/stat`, counting
/// pid as 0 and the parenthesized name as 1.
pub const RSS_FIELD: usize = 23;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub name: String,
    pub rss_mb: f64,
}

/// Top `limit` processes by resident memory.
pub fn collect(proc_root: &Path, limit: usize, page_size: u64) -> Vec<ProcessEntry> {
    collect_until(proc_root, limit, page_size, None)
}

/// Like [`collect`], but stops reading entries once `deadline` has passed
/// and ranks whatever was read so far.
pub fn collect_until(
    proc_root: &Path,
    limit: usize,
    page_size: u64,
    deadline: Option<Instant>,
) -> Vec<ProcessEntry> {
    let Some(root) = proc_root.to_str() else {
        error!(path = %proc_root.display(), "proc root is not valid UTF-8");
        return Vec::new();
    };
    let pattern = format!("{}/[0-9]*/stat", Pattern::escape(root.trim_end_matches('/')));
    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            error!(pattern = %pattern, error = %e, "process scan failed");
            return Vec::new();
        }
    };
    let mut procs = Vec::new();
    for entry in entries {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(read = procs.len(), "process scan deadline passed, ranking partial list");
            break;
        }
        // Unreadable entries and failed reads are processes that exited mid-scan.
        let Ok(path) = entry else { continue };
        let Ok(line) = fs::read_to_string(&path) else {
            trace!(path = %path.display(), "process vanished during scan");
            continue;
        };
        match parse_stat(&line, page_size) {
            Ok(p) => procs.push(p),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping malformed process entry"),
        }
    }
    info!(found = procs.len(), limit, "top processes read");
    rank(procs, limit)
}

/// Parses one `pid (name) state ... rss ...` line.
///
/// The name runs from the first `(` to the last `)`, so names holding
/// spaces or parentheses of their own survive intact.
pub fn parse_stat(line: &str, page_size: u64) -> Result<ProcessEntry, SampleError> {
    let open = line
        .find('(')
        .ok_or_else(|| SampleError::parse("no opening parenthesis before name"))?;
    let close = line
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| SampleError::parse("no closing parenthesis after name"))?;
    let pid = line[..open]
        .trim()
        .parse::<i32>()
        .map_err(|_| SampleError::parse(format!("bad pid {:?}", line[..open].trim())))?;
    let name = line[open + 1..close].to_string();
    let raw = line[close + 1..]
        .split_whitespace()
        .nth(RSS_FIELD - 2)
        .ok_or_else(|| SampleError::parse("stat line too short"))?;
    let pages = raw
        .parse::<u64>()
        .map_err(|_| SampleError::parse(format!("bad rss {raw:?}")))?;
    Ok(ProcessEntry {
        pid,
        name,
        rss_mb: round1(pages as f64 * page_size as f64 / 1024.0 / 1024.0),
    })
}

/// Sorts by `rss_mb` descending, keeping discovery order among ties, then
/// keeps the first `limit`.
pub fn rank(mut procs: Vec<ProcessEntry>, limit: usize) -> Vec<ProcessEntry> {
    procs.sort_by(|a, b| b.rss_mb.total_cmp(&a.rss_mb));
    procs.truncate(limit);
    procs
}
