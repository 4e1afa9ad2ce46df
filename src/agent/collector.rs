use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::model::MetricRecord;

use super::buffer::LocalBuffer;

/// Samples process/runtime and host statistics into the local buffer.
///
/// Both sampling entry points run on independent periodic tasks and
/// write through `LocalBuffer::set`; concurrent ticks are expected.
pub struct Collector {
    buffer: Arc<LocalBuffer>,
    poll_count: AtomicI64,
    system: Mutex<System>,
}

impl Collector {
    pub fn new(buffer: Arc<LocalBuffer>) -> Self {
        Self {
            buffer,
            poll_count: AtomicI64::new(0),
            system: Mutex::new(System::new()),
        }
    }

    /// Process and runtime gauges, plus the PollCount counter and the
    /// RandomValue liveness gauge.
    pub fn collect_runtime(&self) {
        let pid = Pid::from_u32(std::process::id());
        let mut gauges: Vec<(&str, f64)> = Vec::with_capacity(24);

        {
            let mut sys = self.system.lock().unwrap();
            sys.refresh_memory();
            sys.refresh_cpu_all();
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

            gauges.push(("UsedMemory", sys.used_memory() as f64));
            gauges.push(("AvailableMemory", sys.available_memory() as f64));
            gauges.push(("TotalSwap", sys.total_swap() as f64));
            gauges.push(("FreeSwap", sys.free_swap() as f64));
            gauges.push(("UsedSwap", sys.used_swap() as f64));
            gauges.push(("NumCpus", sys.cpus().len() as f64));
            gauges.push(("GlobalCpuUtilization", f64::from(sys.global_cpu_usage())));

            if let Some(process) = sys.process(pid) {
                let disk = process.disk_usage();
                gauges.push(("ResidentMemory", process.memory() as f64));
                gauges.push(("VirtualMemory", process.virtual_memory() as f64));
                gauges.push(("ProcessCpuPercent", f64::from(process.cpu_usage())));
                gauges.push(("ProcessRunTime", process.run_time() as f64));
                gauges.push(("DiskReadBytes", disk.read_bytes as f64));
                gauges.push(("DiskWrittenBytes", disk.written_bytes as f64));
                gauges.push(("TotalDiskReadBytes", disk.total_read_bytes as f64));
                gauges.push(("TotalDiskWrittenBytes", disk.total_written_bytes as f64));
            }
        }

        let load = System::load_average();
        gauges.push(("LoadAverage1", load.one));
        gauges.push(("LoadAverage5", load.five));
        gauges.push(("LoadAverage15", load.fifteen));
        gauges.push(("Uptime", System::uptime() as f64));
        gauges.push(("BootTime", System::boot_time() as f64));

        for (name, value) in gauges {
            self.buffer.set(MetricRecord::gauge(name, value));
        }

        // The counter carries the running total since the last send
        // cycle; the delivery pipeline resets it after each cycle.
        let count = self.poll_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.buffer.set(MetricRecord::counter("PollCount", count));

        let random = rand::thread_rng().gen_range(0.0..100.0);
        self.buffer.set(MetricRecord::gauge("RandomValue", random));
    }

    /// Host-level memory and CPU utilization gauges.
    pub fn collect_host(&self) {
        let mut sys = self.system.lock().unwrap();
        sys.refresh_memory();
        sys.refresh_cpu_all();

        let total = sys.total_memory() as f64;
        let free = sys.free_memory() as f64;
        let cpu = f64::from(sys.global_cpu_usage());
        drop(sys);

        self.buffer.set(MetricRecord::gauge("TotalMemory", total));
        self.buffer.set(MetricRecord::gauge("FreeMemory", free));
        self.buffer.set(MetricRecord::gauge("CPUutilization1", cpu));
    }

    /// Zeroes the poll counter. Called by the delivery pipeline exactly
    /// once per send cycle, success or failure.
    pub fn reset_poll_count(&self) {
        self.poll_count.store(0, Ordering::Relaxed);
    }

    pub fn poll_count(&self) -> i64 {
        self.poll_count.load(Ordering::Relaxed)
    }
}
