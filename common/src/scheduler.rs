//! Cooperative periodic task table.
//!
//! Tasks are registered once at boot and dispatched by [`TaskScheduler::tick`] in
//! registration order. A late tick fires a task once and re-bases its period on the tick
//! time, so missed periods are coalesced rather than queued.

use tracing::debug;

use crate::error::ConfigurationError;

pub type TaskAction<C> = Box<dyn FnMut(&mut C, u64) + Send>;

pub struct PeriodicTask<C> {
    name: &'static str,
    interval_ms: u64,
    run_on_start: bool,
    last_fire_ms: Option<u64>,
    action: TaskAction<C>,
}

impl<C> PeriodicTask<C> {
    pub fn new<F>(name: &'static str, interval_ms: u64, action: F) -> Self
    where
        F: FnMut(&mut C, u64) + Send + 'static,
    {
        Self {
            name,
            interval_ms,
            run_on_start: false,
            last_fire_ms: None,
            action: Box::new(action),
        }
    }

    /// Fire on the first tick after start instead of one interval later.
    pub fn run_on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    fn is_due(&self, now_ms: u64) -> bool {
        match self.last_fire_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
            None => true,
        }
    }
}

pub struct TaskScheduler<C> {
    tasks: Vec<PeriodicTask<C>>,
    started: bool,
}

impl<C> Default for TaskScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TaskScheduler<C> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            started: false,
        }
    }

    pub fn register(&mut self, task: PeriodicTask<C>) -> Result<(), ConfigurationError> {
        if self.started {
            return Err(ConfigurationError::SchedulerStarted(task.name));
        }
        if task.interval_ms == 0 {
            return Err(ConfigurationError::InvalidInterval(task.name));
        }
        if self.tasks.iter().any(|existing| existing.name == task.name) {
            return Err(ConfigurationError::DuplicateTask(task.name));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn start(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            task.last_fire_ms = if task.run_on_start {
                None
            } else {
                Some(now_ms)
            };
        }
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Runs every due task once. Returns how many fired.
    pub fn tick(&mut self, ctx: &mut C, now_ms: u64) -> usize {
        if !self.started {
            debug!(target: "cydwx::scheduler", "tick before start ignored");
            return 0;
        }

        let mut fired = 0;
        for task in &mut self.tasks {
            if !task.is_due(now_ms) {
                continue;
            }
            (task.action)(ctx, now_ms);
            task.last_fire_ms = Some(now_ms);
            fired += 1;
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(PeriodicTask::name).collect()
    }

    pub fn last_fire_ms(&self, name: &str) -> Option<u64> {
        self.tasks
            .iter()
            .find(|task| task.name == name)
            .and_then(|task| task.last_fire_ms)
    }
}
