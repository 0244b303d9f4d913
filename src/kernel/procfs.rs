//! Process listing from `/proc`
//!
//! CPU and memory shares follow the same arithmetic `ps` uses: lifetime CPU
//! time over elapsed time since start, and resident size over `MemTotal`,
//! both truncated to one decimal place.

use crate::config::types::{MonitorError, ProcessRow, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Fields of `/proc/<pid>/stat` the listing needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFields {
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
    pub rss_pages: u64,
}

/// Parse `/proc/<pid>/stat`
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
pub fn parse_stat(content: &str) -> Result<StatFields> {
    let close = content
        .rfind(')')
        .ok_or_else(|| MonitorError::Process("Invalid /proc stat format".to_string()))?;
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();

    // fields[0] is the state (stat field 3)
    if fields.len() < 22 {
        return Err(MonitorError::Process(
            "Truncated /proc stat record".to_string(),
        ));
    }

    let field = |idx: usize, name: &str| -> Result<u64> {
        fields[idx]
            .parse::<u64>()
            .map_err(|_| MonitorError::Process(format!("Invalid {} in /proc stat", name)))
    };

    Ok(StatFields {
        utime: field(11, "utime")?,
        stime: field(12, "stime")?,
        starttime: field(19, "starttime")?,
        rss_pages: field(21, "rss")?,
    })
}

/// Real uid from `/proc/<pid>/status`
pub fn parse_status_uid(content: &str) -> Option<u32> {
    content
        .lines()
        .find(|line| line.starts_with("Uid:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|uid| uid.parse().ok())
}

/// `MemTotal` in KiB from `/proc/meminfo`
pub fn parse_mem_total_kb(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}

/// System uptime in seconds from `/proc/uptime`
pub fn parse_uptime(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Percentage truncated to one decimal place, the way `ps` prints it
fn permille_percent(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        return 0.0;
    }
    ((numerator * 1000.0) / denominator).floor() / 10.0
}

fn resolve_user(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

/// Scanner over a procfs mount
#[derive(Debug, Clone)]
pub struct ProcScanner {
    root: PathBuf,
    clock_ticks: u64,
    page_size: u64,
}

impl ProcScanner {
    /// Scanner over the host's `/proc`
    pub fn new() -> Self {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            root: PathBuf::from("/proc"),
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
        }
    }

    /// Scanner over an alternate procfs root
    pub fn with_root<P: AsRef<Path>>(root: P, clock_ticks: u64, page_size: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            clock_ticks: clock_ticks.max(1),
            page_size,
        }
    }

    fn read(&self, relative: &str) -> Result<String> {
        let path = self.root.join(relative);
        fs::read_to_string(&path).map_err(|e| {
            MonitorError::Process(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    fn command_line(&self, pid: u32, fallback: &str) -> String {
        let raw = fs::read(self.root.join(format!("{}/cmdline", pid))).unwrap_or_default();
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        if args.is_empty() {
            format!("[{}]", fallback)
        } else {
            args.join(" ")
        }
    }

    fn row(&self, pid: u32, uptime: f64, mem_total_kb: u64) -> Result<ProcessRow> {
        let stat_content = self.read(&format!("{}/stat", pid))?;
        let stat = parse_stat(&stat_content)?;
        let status = self.read(&format!("{}/status", pid))?;
        let uid = parse_status_uid(&status)
            .ok_or_else(|| MonitorError::Process(format!("No Uid line for pid {}", pid)))?;

        let comm = stat_content
            .find('(')
            .zip(stat_content.rfind(')'))
            .map(|(open, close)| stat_content[open + 1..close].to_string())
            .unwrap_or_default();

        let ticks = self.clock_ticks as f64;
        let total_ticks = stat.utime + stat.stime;
        let elapsed = uptime - stat.starttime as f64 / ticks;
        let rss_kb = stat.rss_pages * self.page_size / 1024;

        Ok(ProcessRow {
            pid,
            user: resolve_user(uid),
            command: self.command_line(pid, &comm),
            cpu_percent: permille_percent(total_ticks as f64 / ticks, elapsed),
            mem_percent: permille_percent(rss_kb as f64, mem_total_kb as f64),
            cpu_time_secs: total_ticks / self.clock_ticks,
        })
    }

    /// Enumerate live processes
    ///
    /// Processes that exit mid-scan are skipped.
    pub fn scan(&self) -> Result<Vec<ProcessRow>> {
        let uptime = parse_uptime(&self.read("uptime")?)
            .ok_or_else(|| MonitorError::Process("Invalid /proc/uptime".to_string()))?;
        let mem_total_kb = parse_mem_total_kb(&self.read("meminfo")?)
            .ok_or_else(|| MonitorError::Process("No MemTotal in /proc/meminfo".to_string()))?;

        let entries = fs::read_dir(&self.root).map_err(|e| {
            MonitorError::Process(format!("Failed to list {}: {}", self.root.display(), e))
        })?;

        let mut rows = Vec::new();
        for entry in entries.flatten() {
            let pid = match entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            match self.row(pid, uptime, mem_total_kb) {
                Ok(row) => rows.push(row),
                Err(e) => log::debug!("Skipping pid {}: {}", pid, e),
            }
        }

        rows.sort_by_key(|row| row.pid);
        Ok(rows)
    }
}

impl Default for ProcScanner {
    fn default() -> Self {
        Self::new()
    }
}
