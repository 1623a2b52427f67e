//! Deadlock-bounded lifecycle flag and the worker thread built on it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{DriverError, Result};

/// Default bound for acquiring a [`DeadlockFlag`].
pub const DEFAULT_DEADLOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct FlagState {
    value: bool,
    held: bool,
}

/// A boolean guarded by a lock whose acquisition is time bounded.
///
/// Used only for start/stop signalling between an owner and its worker.
/// Failing to acquire within the bound yields [`DriverError::Deadlock`]
/// instead of blocking forever.
#[derive(Debug)]
pub struct DeadlockFlag {
    state: Mutex<FlagState>,
    released: Condvar,
    timeout: Duration,
}

impl DeadlockFlag {
    pub fn new(value: bool) -> Self {
        Self::with_timeout(value, DEFAULT_DEADLOCK_TIMEOUT)
    }

    pub fn with_timeout(value: bool, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(FlagState { value, held: false }),
            released: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take exclusive access to the flag, waiting at most the configured bound.
    pub fn acquire(&self) -> Result<FlagGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock_state();
        while state.held {
            let now = Instant::now();
            if now >= deadline {
                tracing::error!(timeout = ?self.timeout, "lifecycle flag acquisition timed out");
                return Err(DriverError::Deadlock(self.timeout));
            }
            state = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.held = true;
        Ok(FlagGuard { flag: self })
    }

    /// Read the flag under the bounded lock.
    pub fn get(&self) -> Result<bool> {
        Ok(self.acquire()?.get())
    }

    /// Write the flag under the bounded lock.
    pub fn set(&self, value: bool) -> Result<()> {
        self.acquire()?.set(value);
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, FlagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to a [`DeadlockFlag`]; released on drop.
#[derive(Debug)]
pub struct FlagGuard<'a> {
    flag: &'a DeadlockFlag,
}

impl FlagGuard<'_> {
    pub fn get(&self) -> bool {
        self.flag.lock_state().value
    }

    pub fn set(&mut self, value: bool) {
        self.flag.lock_state().value = value;
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.lock_state().held = false;
        self.flag.released.notify_one();
    }
}

/// A background thread with a deadlock-bounded quit flag.
#[derive(Debug)]
pub struct WorkerThread {
    quit: Arc<DeadlockFlag>,
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl WorkerThread {
    /// Spawn `body`, handing it the shared quit flag.
    pub fn start<F>(name: impl Into<String>, timeout: Duration, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<DeadlockFlag>) + Send + 'static,
    {
        let name = name.into();
        let quit = Arc::new(DeadlockFlag::with_timeout(false, timeout));
        let worker_quit = quit.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(worker_quit))?;
        tracing::debug!(thread = %name, "worker started");
        Ok(Self {
            quit,
            handle: Some(handle),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_quit(&self) -> Result<()> {
        self.quit.set(true)
    }

    pub fn quit_requested(&self) -> Result<bool> {
        self.quit.get()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the thread to exit. A panicked worker is logged, not propagated.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.name, "worker panicked");
            } else {
                tracing::debug!(thread = %self.name, "worker joined");
            }
        }
    }

    /// Request quit and join.
    pub fn end(&mut self) -> Result<()> {
        self.set_quit()?;
        self.join();
        Ok(())
    }
}
