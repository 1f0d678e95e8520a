//! # Device — Buffers, In-Order Queue, Polled Completion
//!
//! The execution substrate the engine targets: a set of flat 64-bit
//! buffers owned for the lifetime of the run, and a single in-order queue
//! that executes compute tasks on a dedicated worker (each task fanning out
//! internally over the thread pool). The host enqueues work, then sleeps in
//! 1 ms polls on a completion event; the whole wait sits inside a host
//! critical section so the controlling client cannot suspend the worker
//! while tasks are in flight. Queue depth is bounded by waiting on an event
//! from early in each batch before enqueueing the next.
//!
//! Factor emission uses an atomic cursor over fixed-size result arrays; the
//! cursor keeps counting past the end so the host can detect overflow at
//! drain time.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::host::HostClient;

/// Result-array capacity: 10^6 factors (16 MB across both arrays).
pub const NUM_RESULTS: u32 = 1_000_000;

/// Lanes per reduction group in the check task.
pub const GROUP_SIZE: usize = 256;

/// Device-side state for one run. `psize` bounds the per-batch prime count;
/// `numgroups` sizes the per-group checksum array.
pub struct DeviceBuffers {
    pub psize: u32,
    pub numgroups: u32,
    pub primes: Mutex<Vec<u64>>,
    pub ps: Mutex<Vec<u64>>,
    pub k: Mutex<Vec<u64>>,
    pub lk: Mutex<Vec<u64>>,
    /// `[0]` accumulates the substrate-side prime total, `[1..]` the
    /// per-group partial sums of terminal residues.
    pub checksum: Mutex<Vec<u64>>,
    pub factor_p: Vec<AtomicI64>,
    pub factor_kn: Vec<AtomicU64>,
    pub factor_count: AtomicU32,
    /// `[0]` is the current batch count, `[1]` the largest batch count seen
    /// since the last result clear (array-bounds telltale).
    pub primecount: [AtomicU32; 2],
    pub flag: AtomicU32,
}

impl DeviceBuffers {
    pub fn new(psize: u32, numgroups: u32) -> Self {
        Self::with_result_capacity(psize, numgroups, NUM_RESULTS)
    }

    fn with_result_capacity(psize: u32, numgroups: u32, nresults: u32) -> Self {
        DeviceBuffers {
            psize,
            numgroups,
            primes: Mutex::new(vec![0; psize as usize]),
            ps: Mutex::new(vec![0; psize as usize]),
            k: Mutex::new(vec![0; psize as usize]),
            lk: Mutex::new(vec![0; psize as usize]),
            checksum: Mutex::new(vec![0; numgroups as usize]),
            factor_p: (0..nresults).map(|_| AtomicI64::new(0)).collect(),
            factor_kn: (0..nresults).map(|_| AtomicU64::new(0)).collect(),
            factor_count: AtomicU32::new(0),
            primecount: [AtomicU32::new(0), AtomicU32::new(0)],
            flag: AtomicU32::new(0),
        }
    }

    /// Number of primes the current batch actually holds, clamped to the
    /// buffer bound (the unclamped count is still visible for overflow
    /// detection through `primecount[1]`).
    pub fn batch_len(&self) -> usize {
        (self.primecount[0].load(Ordering::Acquire) as usize).min(self.psize as usize)
    }

    /// Append one factor candidate. Sign of `p_signed` carries `c`.
    #[inline]
    pub fn push_factor(&self, p_signed: i64, k: u32, n: u32) {
        let idx = self.factor_count.fetch_add(1, Ordering::Relaxed) as usize;
        if idx < self.factor_p.len() {
            self.factor_p[idx].store(p_signed, Ordering::Relaxed);
            self.factor_kn[idx].store((k as u64) | ((n as u64) << 32), Ordering::Relaxed);
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle for one enqueued task.
#[derive(Clone)]
pub struct Event(Arc<AtomicBool>);

impl Event {
    pub fn is_complete(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Single in-order task queue on a dedicated worker thread.
pub struct Queue {
    tx: Option<mpsc::Sender<(Job, Arc<AtomicBool>)>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Queue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<(Job, Arc<AtomicBool>)>();
        let worker = thread::Builder::new()
            .name("device-queue".into())
            .spawn(move || {
                for (job, done) in rx {
                    job();
                    done.store(true, Ordering::Release);
                }
            })
            .expect("spawn device queue");
        Queue {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> Event {
        let done = Arc::new(AtomicBool::new(false));
        self.tx
            .as_ref()
            .expect("device queue closed")
            .send((Box::new(job), Arc::clone(&done)))
            .expect("device queue worker gone");
        Event(done)
    }

    /// An empty task; completes once everything ahead of it has drained.
    pub fn marker(&self) -> Event {
        self.enqueue(|| {})
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}

/// Sleep the host thread in 1 ms polls until `event` completes, inside a
/// critical section so the client cannot interrupt in-flight work.
pub fn wait_on_event(host: &dyn HostClient, event: &Event) {
    host.begin_critical_section();
    while !event.is_complete() {
        thread::sleep(Duration::from_millis(1));
    }
    host.end_critical_section();
}

/// Queue a marker and wait for the queue to drain completely.
pub fn sleep_cpu(host: &dyn HostClient, queue: &Queue) {
    let marker = queue.marker();
    wait_on_event(host, &marker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StandaloneHost;

    #[test]
    fn queue_runs_in_order() {
        let queue = Queue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let log = Arc::clone(&log);
            queue.enqueue(move || log.lock().unwrap().push(i));
        }
        let host = StandaloneHost::new(".");
        sleep_cpu(&host, &queue);
        assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn event_completes_after_wait() {
        let queue = Queue::new();
        let ev = queue.enqueue(|| thread::sleep(Duration::from_millis(5)));
        let host = StandaloneHost::new(".");
        wait_on_event(&host, &ev);
        assert!(ev.is_complete());
    }

    #[test]
    fn factor_cursor_counts_past_capacity() {
        let buf = DeviceBuffers::with_result_capacity(4, 3, 4);
        for i in 0..6u32 {
            buf.push_factor(-7, i, 100 + i);
        }
        // cursor keeps counting so the drain can detect overflow
        assert_eq!(buf.factor_count.load(Ordering::Relaxed), 6);
        assert_eq!(buf.factor_p[0].load(Ordering::Relaxed), -7);
        let kn = buf.factor_kn[3].load(Ordering::Relaxed);
        assert_eq!(kn as u32, 3);
        assert_eq!((kn >> 32) as u32, 103);
    }
}
