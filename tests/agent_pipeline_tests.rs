use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use vitals::agent::{spawn_workers, Collector, LocalBuffer, Transport, BATCH_LIMIT};
use vitals::model::{MetricKind, MetricRecord};

#[derive(Default)]
struct MockTransport {
    batches: Mutex<Vec<Vec<MetricRecord>>>,
    fail: AtomicBool,
}

impl MockTransport {
    fn failing() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    fn batches(&self) -> Vec<Vec<MetricRecord>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn send_batch(&self, batch: Vec<MetricRecord>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected transport failure");
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

#[test]
fn test_buffer_set_replaces_by_id() {
    let buffer = LocalBuffer::new();

    buffer.set(MetricRecord::gauge("cpu", 87.3));
    buffer.set(MetricRecord::gauge("cpu", 12.1));

    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.get("cpu").unwrap().value, Some(12.1));
}

#[test]
fn test_buffer_snapshot_is_independent() {
    let buffer = LocalBuffer::new();
    buffer.set(MetricRecord::gauge("cpu", 1.0));

    let snapshot = buffer.get_all();
    buffer.set(MetricRecord::gauge("cpu", 2.0));

    // The snapshot is a full copy; later writes must not show through.
    assert_eq!(snapshot["cpu"].value, Some(1.0));
    assert_eq!(buffer.get("cpu").unwrap().value, Some(2.0));
}

#[test]
fn test_collector_poll_count_and_reset() {
    let buffer = Arc::new(LocalBuffer::new());
    let collector = Collector::new(buffer.clone());

    collector.collect_runtime();
    collector.collect_runtime();

    let record = buffer.get("PollCount").unwrap();
    assert_eq!(record.kind, MetricKind::Counter);
    assert_eq!(record.delta, Some(2));

    collector.reset_poll_count();
    assert_eq!(collector.poll_count(), 0);

    collector.collect_runtime();
    assert_eq!(buffer.get("PollCount").unwrap().delta, Some(1));
}

#[test]
fn test_collector_emits_liveness_gauge() {
    let buffer = Arc::new(LocalBuffer::new());
    let collector = Collector::new(buffer.clone());

    collector.collect_runtime();

    let random = buffer.get("RandomValue").unwrap();
    assert_eq!(random.kind, MetricKind::Gauge);
    let value = random.value.unwrap();
    assert!((0.0..100.0).contains(&value), "got {value}");
}

#[test]
fn test_host_sampler_writes_named_gauges() {
    let buffer = Arc::new(LocalBuffer::new());
    let collector = Collector::new(buffer.clone());

    collector.collect_host();

    for name in ["TotalMemory", "FreeMemory", "CPUutilization1"] {
        let record = buffer.get(name).unwrap_or_else(|| panic!("missing {name}"));
        assert_eq!(record.kind, MetricKind::Gauge);
        assert!(record.value.is_some());
    }
}

#[tokio::test]
async fn test_small_snapshot_becomes_one_batch() {
    let transport = Arc::new(MockTransport::default());
    let (tx, rx) = mpsc::channel(2);
    let workers = spawn_workers(transport.clone(), rx, 2);

    for i in 0..3 {
        tx.send(MetricRecord::counter(format!("m{i}"), i))
            .await
            .unwrap();
    }
    drop(tx);
    for handle in workers {
        handle.await.unwrap();
    }

    let batches = transport.batches();
    assert_eq!(batches.len(), 1, "3 records under the cap form one batch");
    assert_eq!(batches[0].len(), 3);
}

#[tokio::test]
async fn test_worker_flushes_at_batch_limit() {
    let transport = Arc::new(MockTransport::default());
    let (tx, rx) = mpsc::channel(4);
    let workers = spawn_workers(transport.clone(), rx, 1);

    for i in 0..250 {
        tx.send(MetricRecord::counter(format!("m{i}"), 1))
            .await
            .unwrap();
    }
    drop(tx);
    for handle in workers {
        handle.await.unwrap();
    }

    let sizes: Vec<usize> = transport.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![BATCH_LIMIT, BATCH_LIMIT, 50]);
}

#[tokio::test]
async fn test_pool_drains_everything_on_close() {
    let transport = Arc::new(MockTransport::default());
    let (tx, rx) = mpsc::channel(4);
    let workers = spawn_workers(transport.clone(), rx, 3);

    for i in 0..137 {
        tx.send(MetricRecord::counter(format!("m{i}"), 1))
            .await
            .unwrap();
    }
    drop(tx);
    for handle in workers {
        handle.await.unwrap();
    }

    let batches = transport.batches();
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, 137, "every queued record is flushed on close");
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= BATCH_LIMIT));
}

#[tokio::test]
async fn test_failed_delivery_drops_batch_and_workers_exit() {
    let transport = Arc::new(MockTransport::failing());
    let (tx, rx) = mpsc::channel(2);
    let workers = spawn_workers(transport.clone(), rx, 2);

    for i in 0..5 {
        tx.send(MetricRecord::gauge(format!("m{i}"), 1.0))
            .await
            .unwrap();
    }
    drop(tx);

    // Workers must not hang or retry after a failed send.
    for handle in workers {
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("worker should exit after drain")
            .unwrap();
    }
    assert!(transport.batches().is_empty());
}
