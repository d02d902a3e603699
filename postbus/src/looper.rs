//! A minimal main-thread loop for hosts without a UI toolkit.

use crate::dispatch::{MainThreadSupport, Task};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::error;

struct LoopInner {
    thread: ThreadId,
    sender: Sender<Task>,
}

/// A dedicated thread that runs queued tasks one at a time, in order.
///
/// `MainLoop` implements [`MainThreadSupport`], so it can serve as the main
/// thread of a bus. The thread exits once every clone has been dropped and
/// the queue is empty.
///
/// # Examples
///
/// ```rust
/// use postbus::{EventBus, MainLoop};
///
/// let main = MainLoop::spawn("ui")?;
/// let bus = EventBus::builder().with_main_thread(main.clone()).build();
///
/// let name = main.run_sync(|| std::thread::current().name().map(str::to_string));
/// assert_eq!(name.flatten().as_deref(), Some("ui"));
/// # drop(bus);
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone)]
pub struct MainLoop {
    inner: Arc<LoopInner>,
}

impl MainLoop {
    /// Spawns the loop thread with the given name.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Task>();
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            for task in receiver {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("Main loop task panicked");
                }
            }
        })?;

        Ok(Self {
            inner: Arc::new(LoopInner {
                thread: handle.thread().id(),
                sender,
            }),
        })
    }

    /// Returns the id of the loop thread.
    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread
    }

    /// Returns whether the caller is running on the loop thread.
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Queues `task` on the loop. Returns false if the loop has stopped.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.inner.sender.send(Box::new(task)).is_ok()
    }

    /// Runs `f` on the loop thread and waits for its result.
    ///
    /// Runs `f` directly when called from the loop thread. Returns `None` if
    /// the loop has stopped or `f` panicked.
    pub fn run_sync<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_loop_thread() {
            return Some(f());
        }

        let (sender, receiver) = bounded(1);
        if !self.post(move || {
            let _ = sender.send(f());
        }) {
            return None;
        }
        receiver.recv().ok()
    }
}

impl MainThreadSupport for MainLoop {
    fn is_main_thread(&self) -> bool {
        self.is_loop_thread()
    }

    fn schedule(&self, task: Task) {
        if self.inner.sender.send(task).is_err() {
            error!("Main loop has stopped; scheduled delivery dropped");
        }
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("thread", &self.inner.thread)
            .finish()
    }
}
