//! Process-of-interest selection

use crate::config::settings::SelectorConfig;
use crate::config::types::ProcessRow;
use crate::kernel::host::HostSystem;

/// Whether `row` belongs to the sandboxed workload
pub fn is_workload_process(row: &ProcessRow, filter: &SelectorConfig) -> bool {
    row.user == filter.user && row.command.contains(&filter.command_marker)
}

/// Busiest non-idle workload process in `rows`
///
/// Only processes with a CPU share above zero can be chosen; ties keep the
/// first row listed.
pub fn pick_busiest(rows: &[ProcessRow], filter: &SelectorConfig) -> Option<u32> {
    let mut best: Option<&ProcessRow> = None;

    for row in rows
        .iter()
        .filter(|row| is_workload_process(row, filter) && !row.is_idle())
    {
        let current_max = best.map(|b| b.cpu_percent).unwrap_or(0.0);
        if row.cpu_percent > current_max {
            best = Some(row);
        }
    }

    best.map(|row| row.pid)
}

/// Select the sampling target, or `None` when nothing qualifies
pub fn select_target<H: HostSystem + ?Sized>(host: &H, filter: &SelectorConfig) -> Option<u32> {
    let rows = match host.list_processes() {
        Ok(rows) => rows,
        Err(e) => {
            log::debug!("Process listing failed: {}", e);
            return None;
        }
    };

    let target = pick_busiest(&rows, filter);
    if target.is_none() {
        log::debug!(
            "No active process owned by {} matching '{}'",
            filter.user,
            filter.command_marker
        );
    }
    target
}
