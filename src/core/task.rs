//! Cancellable worker threads
//!
//! A [`TaskGroup`] owns the threads of one session. Cancelling the group
//! wakes every task waiting on its [`CancelToken`], and joining it is the
//! barrier that teardown waits on.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// Shared cancellation flag with wakeup
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until cancelled
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            cancelled = cvar.wait(cancelled).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Sleep for up to `timeout`. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = match cvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        *cancelled
    }
}

/// Observer for a spawned task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    name: String,
    done: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Marks the task finished even when it unwinds
struct DoneGuard(Arc<AtomicBool>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct Task {
    name: String,
    handle: JoinHandle<()>,
}

/// Threads sharing one cancellation scope
#[derive(Default)]
pub struct TaskGroup {
    token: CancelToken,
    tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F>(&mut self, name: &str, f: F) -> io::Result<TaskHandle>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let guard = DoneGuard(done.clone());
        let token = self.token.clone();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _guard = guard;
            f(token);
        })?;

        debug!("Spawned task {}", name);
        self.tasks.push(Task {
            name: name.to_string(),
            handle,
        });
        Ok(TaskHandle {
            name: name.to_string(),
            done,
        })
    }

    /// Cancel every task and wait for all of them to finish
    pub fn cancel_and_join(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            match task.handle.join() {
                Ok(()) => debug!("Task {} finished", task.name),
                Err(_) => error!("Task {} panicked", task.name),
            }
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.cancel_and_join();
        }
    }
}
