//! Cancelable scheduled tasks
//!
//! Deadlines are milliseconds on the caller's monotonic clock. The queue
//! never fires anything by itself: the driver asks for the next deadline,
//! sleeps until then and collects whatever is due.

/// Handle for cancelling a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Debug)]
struct ScheduledTask<T> {
    id: TaskId,
    deadline_ms: f64,
    task: T,
}

/// Deadline-ordered task queue
#[derive(Debug)]
pub struct TaskQueue<T> {
    next_id: u64,
    tasks: Vec<ScheduledTask<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            tasks: Vec::new(),
        }
    }

    /// Schedule `task` to become due at `deadline_ms`
    pub fn schedule(&mut self, deadline_ms: f64, task: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        // Stable for equal deadlines: insert after every task due no later
        let pos = self
            .tasks
            .iter()
            .position(|t| t.deadline_ms > deadline_ms)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, ScheduledTask { id, deadline_ms, task });
        id
    }

    /// Cancel a task; returns it if it was still pending
    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        let pos = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(pos).task)
    }

    /// Whether `id` is still pending
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<f64> {
        self.tasks.first().map(|t| t.deadline_ms)
    }

    /// Remove and return every task due at `now_ms`, earliest first
    pub fn take_due(&mut self, now_ms: f64) -> Vec<(TaskId, T)> {
        let split = self
            .tasks
            .iter()
            .position(|t| t.deadline_ms > now_ms)
            .unwrap_or(self.tasks.len());
        self.tasks.drain(..split).map(|t| (t.id, t.task)).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
