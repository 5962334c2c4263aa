//! One-shot background worker for plugin initialization.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{Error, Result};

/// A dedicated thread running one closure, whose result is collected later.
///
/// The closure runs under `catch_unwind`, so a panic becomes
/// [`Error::InitPanicked`] instead of tearing down the host.
pub struct InitWorker<T> {
    name: String,
    receiver: Option<Receiver<thread::Result<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> InitWorker<T> {
    /// Start `task` on a new thread called `name`.
    pub fn spawn<F>(name: &str, task: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(task));
                // The receiver is gone when the worker was detached.
                let _ = sender.send(result);
            })?;

        debug!("Started worker thread '{}'", name);
        Ok(Self {
            name: name.to_string(),
            receiver: Some(receiver),
            handle: Some(handle),
        })
    }

    /// Collect the result without blocking.
    ///
    /// Returns `None` while the task is still running and after the result was taken.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        let receiver = self.receiver.as_ref()?;
        let outcome = match receiver.try_recv() {
            Ok(result) => result.map_err(|_| Error::InitPanicked),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(Error::InitPanicked),
        };
        self.finish();
        Some(outcome)
    }

    /// Wait at most `timeout` for the result.
    ///
    /// On timeout the thread is detached and [`Error::InitTimeout`] is returned.
    /// Returns `Ok(None)` if the result was already taken.
    pub fn join(mut self, timeout: Duration) -> Result<Option<T>> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(None);
        };

        match receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.finish();
                result.map(Some).map_err(|_| Error::InitPanicked)
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Worker '{}' did not finish within {:?}, detaching it",
                    self.name, timeout
                );
                self.handle.take();
                Err(Error::InitTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finish();
                Err(Error::InitPanicked)
            }
        }
    }

    fn finish(&mut self) {
        self.receiver = None;
        if let Some(handle) = self.handle.take() {
            // The result was already sent, so the thread is exiting.
            let _ = handle.join();
        }
    }
}

impl<T> Drop for InitWorker<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!("Detaching worker thread '{}'", self.name);
        }
    }
}
