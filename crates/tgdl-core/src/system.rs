use std::{
    path::Path,
    time::{Duration, Instant},
};

use sysinfo::{Disks, Networks, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::formatting::{readable_size, readable_time};

/// Host + process figures shown by `/stats`.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemStats {
    pub uptime: Duration,
    pub disk_total: u64,
    pub disk_used: u64,
    pub disk_free: u64,
    pub process_rss: u64,
    pub net_sent: u64,
    pub net_received: u64,
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub disk_percent: f32,
}

/// Sample the host. Sleeps for one CPU measurement window.
pub async fn collect(started: Instant, work_dir: &Path) -> SystemStats {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(500))).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let process_rss = match sysinfo::get_current_pid() {
        Ok(pid) => {
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            sys.process(pid).map(|p| p.memory()).unwrap_or(0)
        }
        Err(_) => 0,
    };

    let (disk_total, disk_free) = disk_for(work_dir);
    let disk_used = disk_total.saturating_sub(disk_free);

    let networks = Networks::new_with_refreshed_list();
    let (net_sent, net_received) = networks
        .iter()
        .fold((0u64, 0u64), |(tx, rx), (_, data)| {
            (tx + data.total_transmitted(), rx + data.total_received())
        });

    SystemStats {
        uptime: started.elapsed(),
        disk_total,
        disk_used,
        disk_free,
        process_rss,
        net_sent,
        net_received,
        cpu_percent: sys.global_cpu_usage(),
        ram_percent: percent(sys.used_memory(), sys.total_memory()),
        disk_percent: percent(disk_used, disk_total),
    }
}

/// Total and available bytes of the disk mounted closest to `path`.
fn disk_for(path: &Path) -> (u64, u64) {
    let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.total_space(), d.available_space()))
        .unwrap_or((0, 0))
}

fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 100.0 / whole as f64) as f32
}

pub fn render(stats: &SystemStats) -> String {
    format!(
        "<b>≧◉◡◉≦ Bot is Up and Running successfully.</b>\n\n\
         <b>➜ Bot Uptime:</b> <code>{}</code>\n\
         <b>➜ Total Disk Space:</b> <code>{}</code>\n\
         <b>➜ Used:</b> <code>{}</code>\n\
         <b>➜ Free:</b> <code>{}</code>\n\
         <b>➜ Memory Usage:</b> <code>{} MiB</code>\n\n\
         <b>➜ Upload:</b> <code>{}</code>\n\
         <b>➜ Download:</b> <code>{}</code>\n\n\
         <b>➜ CPU:</b> <code>{:.1}%</code> | \
         <b>➜ RAM:</b> <code>{:.1}%</code> | \
         <b>➜ DISK:</b> <code>{:.1}%</code>",
        readable_time(stats.uptime),
        readable_size(stats.disk_total),
        readable_size(stats.disk_used),
        readable_size(stats.disk_free),
        stats.process_rss / (1024 * 1024),
        readable_size(stats.net_sent),
        readable_size(stats.net_received),
        stats.cpu_percent,
        stats.ram_percent,
        stats.disk_percent,
    )
}
