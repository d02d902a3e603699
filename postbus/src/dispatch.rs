//! Execution contexts used by the thread modes.
//!
//! The bus itself never depends on a UI toolkit. The host supplies a
//! [`MainThreadSupport`] for the main thread and optionally an [`Executor`]
//! for the async pool; the single background worker is owned by the bus.

use crossbeam_channel::{unbounded, SendError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::error;

/// A unit of deferred delivery work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs deliveries for [`ThreadMode::Async`](crate::ThreadMode::Async).
///
/// Any `Fn(Task)` closure is an executor.
///
/// # Examples
///
/// ```rust
/// use postbus::{EventBus, Task};
///
/// let bus = EventBus::builder()
///     .with_executor(|task: Task| {
///         std::thread::spawn(task);
///     })
///     .build();
/// ```
pub trait Executor: Send + Sync + 'static {
    /// Runs `task`, possibly concurrently with other tasks.
    fn execute(&self, task: Task);
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn execute(&self, task: Task) {
        self(task)
    }
}

/// The host's designated main thread.
///
/// This is the only environment-specific seam of the bus. A bus built
/// without one treats every thread as the main thread.
pub trait MainThreadSupport: Send + Sync + 'static {
    /// Returns whether the calling thread is the main thread.
    fn is_main_thread(&self) -> bool;

    /// Runs `task` on the main thread as soon as possible.
    fn schedule(&self, task: Task);
}

/// Executor that spawns one OS thread per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawnExecutor;

impl Executor for ThreadSpawnExecutor {
    fn execute(&self, task: Task) {
        let slot = Arc::new(Mutex::new(Some(task)));
        let worker_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name("postbus-async".to_string())
            .spawn(move || {
                if let Some(task) = worker_slot.lock().take() {
                    task();
                }
            });

        if let Err(error) = spawned {
            error!(%error, "Failed to spawn async delivery thread; running it inline");
            if let Some(task) = slot.lock().take() {
                task();
            }
        }
    }
}

/// Executor backed by the blocking pool of a tokio runtime.
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioExecutor {
    /// Creates an executor spawning onto `handle`.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates an executor for the runtime the caller is running in.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        // Consumer methods are synchronous, so they belong on the blocking pool.
        drop(self.handle.spawn_blocking(task));
    }
}

/// The executor used when the builder is not given one.
pub(crate) fn default_executor() -> Arc<dyn Executor> {
    #[cfg(feature = "tokio")]
    {
        static RUNTIME: OnceLock<Option<tokio::runtime::Runtime>> = OnceLock::new();
        let runtime = RUNTIME.get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("postbus-async")
                .build()
                .map_err(|error| {
                    error!(%error, "Failed to start the async runtime; falling back to threads");
                })
                .ok()
        });
        if let Some(runtime) = runtime {
            return Arc::new(TokioExecutor::new(runtime.handle().clone()));
        }
    }
    Arc::new(ThreadSpawnExecutor)
}

struct MainQueue {
    tasks: VecDeque<Task>,
    active: bool,
}

/// FIFO queue drained on the main thread, used by the main thread modes.
///
/// One drain turn runs until the queue is empty or the time budget is used
/// up, then schedules the next turn so the main thread stays responsive.
pub(crate) struct MainPoster {
    support: Arc<dyn MainThreadSupport>,
    queue: Mutex<MainQueue>,
    budget: Duration,
}

impl MainPoster {
    pub(crate) fn new(support: Arc<dyn MainThreadSupport>, budget: Duration) -> Self {
        Self {
            support,
            queue: Mutex::new(MainQueue {
                tasks: VecDeque::new(),
                active: false,
            }),
            budget,
        }
    }

    pub(crate) fn enqueue(self: &Arc<Self>, task: Task) {
        let start_turn = {
            let mut queue = self.queue.lock();
            queue.tasks.push_back(task);
            !std::mem::replace(&mut queue.active, true)
        };
        if start_turn {
            self.schedule_turn();
        }
    }

    fn schedule_turn(self: &Arc<Self>) {
        let poster = self.clone();
        self.support.schedule(Box::new(move || poster.drain()));
    }

    fn drain(self: Arc<Self>) {
        let started = Instant::now();
        loop {
            let task = {
                let mut queue = self.queue.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.active = false;
                        return;
                    }
                }
            };
            task();

            if started.elapsed() >= self.budget {
                self.schedule_turn();
                return;
            }
        }
    }
}

/// Single worker thread draining background deliveries in order.
///
/// The thread is spawned on first use and exits when the poster is dropped.
pub(crate) struct BackgroundPoster {
    name: String,
    sender: OnceLock<Option<Sender<Task>>>,
}

impl BackgroundPoster {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender: OnceLock::new(),
        }
    }

    pub(crate) fn enqueue(&self, task: Task) {
        match self.sender.get_or_init(|| self.spawn_worker()) {
            Some(sender) => {
                if let Err(SendError(task)) = sender.send(task) {
                    error!(worker = %self.name, "Background worker is gone; running delivery inline");
                    task();
                }
            }
            None => task(),
        }
    }

    fn spawn_worker(&self) -> Option<Sender<Task>> {
        let (sender, receiver) = unbounded::<Task>();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                for task in receiver {
                    task();
                }
            });

        match spawned {
            Ok(_) => Some(sender),
            Err(error) => {
                error!(
                    worker = %self.name,
                    %error,
                    "Failed to spawn background worker; deliveries run inline"
                );
                None
            }
        }
    }
}
