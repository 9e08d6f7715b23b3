//! Processors that run tasks.
//!
//! [`LocalProcessorGroup`] backs each processor with one worker thread and a
//! priority queue. Besides plain tasks, a worker can host installed
//! [`ReplayWork`] items, which it polls whenever it is notified.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::CoreError;
use crate::event::{Event, EventService, OnTrigger};
use crate::ids::{NodeId, ProcessorId, TaskFuncId};
use crate::profiling::ProfilingRequestSet;

/// Task body: receives its argument bytes and the processor it runs on.
pub type TaskFn = Arc<dyn Fn(&[u8], ProcessorId) + Send + Sync>;

/// Result of polling a [`ReplayWork`] item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayProgress {
    /// Work remains; poll again on the next notification.
    Pending,
    /// Nothing left; the worker drops the item.
    Done,
}

/// Work installed on a processor that the worker polls between tasks.
pub trait ReplayWork: Send + Sync {
    /// Run everything that is ready right now.
    fn run_ready(&self) -> ReplayProgress;
}

/// Processor service consumed by the subgraph engine.
pub trait ProcessorService: Send + Sync {
    /// Spawn `func` on `proc` once `precondition` triggers. Returns the task's
    /// completion event, which is poisoned if the task could not run.
    fn spawn(
        &self,
        proc: ProcessorId,
        func: TaskFuncId,
        args: &[u8],
        precondition: Event,
        priority: i32,
        profiling: &ProfilingRequestSet,
    ) -> Event;

    /// Install a replay item on `proc`.
    fn install_replay(&self, proc: ProcessorId, work: Arc<dyn ReplayWork>) -> Result<(), CoreError>;

    /// Wake `proc` so it polls its replay items.
    fn notify(&self, proc: ProcessorId);

    /// Whether `proc` is hosted by this service.
    fn owns(&self, proc: ProcessorId) -> bool;
}

struct ReadyTask {
    priority: i32,
    seq: u64,
    func: TaskFuncId,
    args: Vec<u8>,
    completion: Event,
}

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ReadyTask {}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyTask {
    // Higher priority first, then FIFO.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<ReadyTask>,
    replays: Vec<Arc<dyn ReplayWork>>,
    wakeups: u64,
}

#[derive(Default)]
struct ProcQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl ProcQueue {
    fn wake(&self) {
        self.state.lock().wakeups += 1;
        self.cond.notify_one();
    }
}

struct GroupInner {
    node: NodeId,
    events: Arc<dyn EventService>,
    tasks: RwLock<HashMap<TaskFuncId, TaskFn>>,
    queues: Vec<ProcQueue>,
    seq: AtomicU64,
    executed: AtomicU64,
    shutdown: AtomicBool,
}

/// Thread-per-processor task executor for one node.
pub struct LocalProcessorGroup {
    inner: Arc<GroupInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalProcessorGroup {
    pub fn new(node: NodeId, count: usize, events: Arc<dyn EventService>) -> Self {
        let inner = Arc::new(GroupInner {
            node,
            events,
            tasks: RwLock::new(HashMap::new()),
            queues: (0..count).map(|_| ProcQueue::default()).collect(),
            seq: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..count)
            .map(|index| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("weave-proc-{}-{}", node.0, index))
                    .spawn(move || inner.worker_loop(index))
                    .unwrap_or_else(|e| panic!("failed to start processor thread: {e}"))
            })
            .collect();

        info!(node = node.0, processors = count, "processor group started");
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    pub fn register_task(&self, id: TaskFuncId, func: TaskFn) {
        self.inner.tasks.write().insert(id, func);
    }

    pub fn processors(&self) -> Vec<ProcessorId> {
        (0..self.inner.queues.len() as u32)
            .map(|i| ProcessorId::new(self.inner.node, i))
            .collect()
    }

    pub fn processor(&self, index: u32) -> ProcessorId {
        ProcessorId::new(self.inner.node, index)
    }

    /// Total tasks run to completion (including panicked ones).
    pub fn executed_tasks(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    /// Stop all workers. Queued tasks are abandoned.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for q in &self.inner.queues {
            q.wake();
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        info!(node = self.inner.node.0, "processor group stopped");
    }
}

impl Drop for LocalProcessorGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl GroupInner {
    fn queue(&self, proc: ProcessorId) -> Result<&ProcQueue, CoreError> {
        if proc.node != self.node {
            return Err(CoreError::UnknownProcessor(proc));
        }
        self.queues
            .get(proc.index as usize)
            .ok_or(CoreError::UnknownProcessor(proc))
    }

    fn enqueue(&self, proc: ProcessorId, task: ReadyTask) {
        match self.queue(proc) {
            Ok(q) => {
                q.state.lock().ready.push(task);
                q.cond.notify_one();
            }
            Err(e) => {
                error!(error = %e, "dropping task");
                self.events.trigger(task.completion, true);
            }
        }
    }

    fn worker_loop(&self, index: usize) {
        let queue = &self.queues[index];
        let proc = ProcessorId::new(self.node, index as u32);
        loop {
            let (task, replays, seen) = {
                let mut state = queue.state.lock();
                if self.shutdown.load(Ordering::Acquire) {
                    break;
                }
                (state.ready.pop(), state.replays.clone(), state.wakeups)
            };

            let mut finished = Vec::new();
            for (i, work) in replays.iter().enumerate() {
                if work.run_ready() == ReplayProgress::Done {
                    finished.push(i);
                }
            }

            let ran = task.is_some();
            if let Some(task) = task {
                self.run_task(proc, task);
            }

            let mut state = queue.state.lock();
            if !finished.is_empty() {
                let done: Vec<_> = finished.iter().map(|&i| Arc::clone(&replays[i])).collect();
                state
                    .replays
                    .retain(|w| !done.iter().any(|d| Arc::ptr_eq(w, d)));
                debug!(proc = %proc, retired = done.len(), "replay work retired");
            }
            if !ran
                && state.ready.is_empty()
                && state.wakeups == seen
                && !self.shutdown.load(Ordering::Acquire)
            {
                queue.cond.wait(&mut state);
            }
        }
    }

    fn run_task(&self, proc: ProcessorId, task: ReadyTask) {
        let func = self.tasks.read().get(&task.func).cloned();
        let poisoned = match func {
            Some(func) => {
                let args = task.args;
                let result = catch_unwind(AssertUnwindSafe(|| func(&args, proc)));
                if result.is_err() {
                    error!(proc = %proc, task = %task.func, "task panicked");
                }
                result.is_err()
            }
            None => {
                error!(proc = %proc, error = %CoreError::UnknownTask(task.func), "task not run");
                true
            }
        };
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.events.trigger(task.completion, poisoned);
    }
}

impl ProcessorService for LocalProcessorGroup {
    fn spawn(
        &self,
        proc: ProcessorId,
        func: TaskFuncId,
        args: &[u8],
        precondition: Event,
        priority: i32,
        profiling: &ProfilingRequestSet,
    ) -> Event {
        let completion = self.inner.events.create();
        if !profiling.is_empty() {
            debug!(
                proc = %proc,
                requests = profiling.len(),
                "profiling requests not supported locally"
            );
        }
        let task = ReadyTask {
            priority,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            func,
            args: args.to_vec(),
            completion,
        };
        let inner = Arc::clone(&self.inner);
        self.inner.events.add_waiter(
            precondition,
            OnTrigger::new(move |poisoned| {
                if poisoned {
                    inner.events.trigger(task.completion, true);
                } else {
                    inner.enqueue(proc, task);
                }
            }),
        );
        completion
    }

    fn install_replay(
        &self,
        proc: ProcessorId,
        work: Arc<dyn ReplayWork>,
    ) -> Result<(), CoreError> {
        let queue = self.inner.queue(proc)?;
        {
            let mut state = queue.state.lock();
            state.replays.push(work);
            state.wakeups += 1;
        }
        queue.cond.notify_one();
        Ok(())
    }

    fn notify(&self, proc: ProcessorId) {
        if let Ok(queue) = self.inner.queue(proc) {
            queue.wake();
        }
    }

    fn owns(&self, proc: ProcessorId) -> bool {
        self.inner.queue(proc).is_ok()
    }
}
