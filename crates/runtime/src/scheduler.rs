//! Scheduler - cooperative interpreter contexts
//!
//! Several interpreters share one thread. Each task runs for one time slice,
//! then goes to the back of the queue; the slice checkpoint in the dispatcher
//! is the only place a task gives up control, and everything it needs to
//! continue is already on its own execution stack.
//!
//! ## Lifecycle
//!
//! ```text
//!   spawn ──► queued ──step_slice──► Yielded / Blocked ──► queued
//!                         │
//!                         └──► Finished / error ──► finished
//! ```

use crate::config::InterpConfig;
use crate::driver::{Interpreter, RunError, Step};
use crate::stats::InterpStats;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::debug;

pub type TaskId = u64;

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub spawned: u64,
    /// Tasks whose run finished, successfully or not.
    pub completed: u64,
    pub failed: u64,
    /// Slices handed out across all tasks.
    pub slices: u64,
    /// High-water mark of queued tasks.
    pub peak_tasks: usize,
}

struct Task {
    id: TaskId,
    interp: Interpreter,
}

struct Finished {
    id: TaskId,
    interp: Interpreter,
    result: Result<(), RunError>,
}

pub struct Scheduler {
    config: InterpConfig,
    queue: VecDeque<Task>,
    finished: Vec<Finished>,
    next_id: TaskId,
    stats: SchedulerStats,
    started: Instant,
}

impl Scheduler {
    pub fn new(config: InterpConfig) -> Self {
        Scheduler {
            config,
            queue: VecDeque::new(),
            finished: Vec::new(),
            next_id: 1,
            stats: SchedulerStats::default(),
            started: Instant::now(),
        }
    }

    /// Queue a new context running `source`.
    pub fn spawn(&mut self, source: &str) -> Result<TaskId, RunError> {
        let interp = Interpreter::new(self.config.clone());
        self.spawn_interpreter(interp, source)
    }

    /// Queue a new context whose output goes to `out`.
    pub fn spawn_with_output(&mut self, source: &str, out: Box<dyn Write>) -> Result<TaskId, RunError> {
        let interp = Interpreter::with_output(self.config.clone(), out);
        self.spawn_interpreter(interp, source)
    }

    fn spawn_interpreter(&mut self, mut interp: Interpreter, source: &str) -> Result<TaskId, RunError> {
        let src = interp
            .context_mut()
            .alloc_string(source.as_bytes().to_vec())
            .cvx();
        interp.begin(src)?;
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(Task { id, interp });
        self.stats.spawned += 1;
        self.stats.peak_tasks = self.stats.peak_tasks.max(self.queue.len());
        debug!(task = id, "spawned");
        Ok(id)
    }

    /// Run every queued task to completion, round-robin. Returns the results
    /// in spawn order.
    pub fn run_all(&mut self) -> Vec<Result<(), RunError>> {
        let mut blocked_streak = 0;
        while let Some(mut task) = self.queue.pop_front() {
            self.stats.slices += 1;
            match task.interp.step_slice() {
                Ok(Step::Yielded) => {
                    blocked_streak = 0;
                    self.queue.push_back(task);
                }
                Ok(Step::Blocked) => {
                    blocked_streak += 1;
                    if blocked_streak > self.queue.len() {
                        // Every task is waiting for input.
                        std::thread::yield_now();
                        blocked_streak = 0;
                    }
                    self.queue.push_back(task);
                }
                Ok(Step::Finished) => self.retire(task, Ok(())),
                Err(e) => self.retire(task, Err(e)),
            }
        }
        let mut done: Vec<&Finished> = self.finished.iter().collect();
        done.sort_by_key(|f| f.id);
        done.iter().map(|f| f.result.clone()).collect()
    }

    fn retire(&mut self, task: Task, result: Result<(), RunError>) {
        self.stats.completed += 1;
        if let Err(e) = &result {
            self.stats.failed += 1;
            debug!(task = task.id, error = %e, "task failed");
        } else {
            debug!(task = task.id, "task finished");
        }
        self.finished.push(Finished {
            id: task.id,
            interp: task.interp,
            result,
        });
    }

    /// A finished task's interpreter, for inspecting its stacks.
    pub fn finished(&self, id: TaskId) -> Option<&Interpreter> {
        self.finished.iter().find(|f| f.id == id).map(|f| &f.interp)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Interpreter counters summed over every task, queued or finished.
    pub fn interp_totals(&self) -> InterpStats {
        let mut totals = InterpStats::default();
        for task in &self.queue {
            totals.merge(task.interp.stats());
        }
        for f in &self.finished {
            totals.merge(f.interp.stats());
        }
        totals
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
