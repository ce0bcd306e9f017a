//! One-shot timer scheduling for the watchdog liveness policy.
//!
//! [`ThreadTimers`] runs a single background scheduler thread over a
//! deadline heap, so re-arming a device's watchdog on every heartbeat
//! costs one heap entry, not one thread. Cancellation is lazy: a cancelled
//! id stays in the heap until its deadline pops, at which point it is
//! discarded without running. The task table is the source of truth for
//! what is still live.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub type TimerId = u64;
pub type TimerTask = Box<dyn FnOnce() + Send>;

/// A monotonic one-shot scheduler. Implementations run each task exactly
/// once after its delay, unless the id is cancelled first.
pub trait TimerDriver: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Cancels a pending timer. Ids that already fired are ignored.
    fn cancel(&self, id: TimerId);
}

#[derive(PartialEq, Eq)]
struct Deadline {
    at: Instant,
    id: TimerId,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct TimerState {
    queue: BinaryHeap<Reverse<Deadline>>,
    tasks: HashMap<TimerId, TimerTask>,
    next_id: TimerId,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Thread-backed [`TimerDriver`]. Dropping it stops the scheduler thread;
/// pending tasks are discarded.
pub struct ThreadTimers {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Default for ThreadTimers {
    fn default() -> Self {
        ThreadTimers::new()
    }
}

impl ThreadTimers {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                queue: BinaryHeap::new(),
                tasks: HashMap::new(),
                next_id: 1,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("vesta-timers".to_string())
            .spawn(move || run_scheduler(worker_shared))
            .expect("spawn timer thread");
        ThreadTimers {
            shared,
            worker: Some(worker),
        }
    }
}

impl TimerDriver for ThreadTimers {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.insert(id, task);
        state.queue.push(Reverse(Deadline {
            at: Instant::now() + delay,
            id,
        }));
        self.shared.wake.notify_one();
        id
    }

    fn cancel(&self, id: TimerId) {
        // The heap entry stays behind as a tombstone; removing the task is
        // what prevents the fire.
        self.shared.state.lock().unwrap().tasks.remove(&id);
    }
}

impl Drop for ThreadTimers {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            state.tasks.clear();
        }
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_scheduler(shared: Arc<Shared>) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return;
        }

        // Collect everything due, dropping tombstoned entries.
        let now = Instant::now();
        let mut due: Vec<TimerTask> = Vec::new();
        while let Some(Reverse(head)) = state.queue.peek() {
            if head.at > now {
                break;
            }
            let id = state.queue.pop().map(|Reverse(d)| d.id).unwrap_or_default();
            if let Some(task) = state.tasks.remove(&id) {
                due.push(task);
            }
        }

        if !due.is_empty() {
            drop(state);
            for task in due {
                task();
            }
            state = shared.state.lock().unwrap();
            continue;
        }

        state = match state.queue.peek() {
            Some(Reverse(head)) => {
                let timeout = head.at.saturating_duration_since(now);
                shared.wake.wait_timeout(state, timeout).unwrap().0
            }
            None => shared.wake.wait(state).unwrap(),
        };
    }
}
