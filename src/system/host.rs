//! 主机与进程资源采样

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

/// 进程内存（字节）与主机内存
#[derive(Debug, Clone, Serialize)]
pub struct MemoryInfo {
    pub rss: u64,
    pub virtual_memory: u64,
    pub host_used: u64,
    pub host_total: u64,
}

/// CPU 使用率（百分比），两次采样之间的平均值，首次采样为 0
#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    pub process_percent: f32,
    pub global_percent: f32,
    pub cores: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub memory: MemoryInfo,
    pub cpu: CpuInfo,
    /// 1 / 5 / 15 分钟平均负载
    pub load_avg: [f64; 3],
    /// 主机开机时长（秒）
    pub uptime: u64,
}

/// 复用同一个 `System`，CPU 使用率需要与上一次刷新做差
pub struct HostMonitor {
    sys: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMonitor {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!("无法获取当前进程 PID: {}", e))
            .ok();
        let mut sys = System::new();
        sys.refresh_cpu();
        if let Some(pid) = pid {
            sys.refresh_process(pid);
        }
        Self {
            sys: Mutex::new(sys),
            pid,
        }
    }

    /// 刷新并读取一次资源快照（同步调用，会读 /proc 等系统接口）
    pub fn snapshot(&self) -> HostSnapshot {
        let mut sys = self.sys.lock();
        sys.refresh_cpu();
        sys.refresh_memory();

        let refreshed = self.pid.filter(|pid| sys.refresh_process(*pid));
        let (rss, virtual_memory, process_percent) = refreshed
            .and_then(|pid| sys.process(pid))
            .map(|p| (p.memory(), p.virtual_memory(), p.cpu_usage()))
            .unwrap_or((0, 0, 0.0));
        let load = System::load_average();

        HostSnapshot {
            memory: MemoryInfo {
                rss,
                virtual_memory,
                host_used: sys.used_memory(),
                host_total: sys.total_memory(),
            },
            cpu: CpuInfo {
                process_percent,
                global_percent: sys.global_cpu_info().cpu_usage(),
                cores: sys.cpus().len(),
            },
            load_avg: [load.one, load.five, load.fifteen],
            uptime: System::uptime(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reports_process_and_host() {
        let monitor = HostMonitor::new();
        let snapshot = monitor.snapshot();

        assert!(snapshot.memory.host_total > 0);
        assert!(snapshot.memory.host_used <= snapshot.memory.host_total);
        assert!(snapshot.memory.rss > 0);
        assert!(snapshot.cpu.cores >= 1);
        assert!(snapshot.load_avg.iter().all(|l| *l >= 0.0));
        assert!(snapshot.uptime > 0);
    }
}
