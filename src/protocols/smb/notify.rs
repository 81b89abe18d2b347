//! Change notification listener
//!
//! `notify` never completes on its own: the client keeps printing change
//! lines until the process is killed. A [`StopHandle`] does exactly that from
//! any thread, which ends the blocking read in [`NotifyStream::listen`].

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{Result, SmbError};
use super::parser::parse_change_line;
use super::transport::{ProcessHandle, ReadOutcome, Transport};
use super::types::ChangeEvent;

/// Stops a running [`NotifyStream`] from another thread
#[derive(Debug, Clone)]
pub struct StopHandle {
    process: Option<Arc<ProcessHandle>>,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(pid = self.process.as_ref().map(|p| p.pid()), "stopping notify");
        if let Some(process) = &self.process {
            process.terminate();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Blocking stream of change events for one directory
pub struct NotifyStream {
    transport: Transport,
    path: String,
    stop: StopHandle,
}

impl NotifyStream {
    /// Issue `notify` on a dedicated, already authenticated transport
    pub(crate) fn start(mut transport: Transport, path: &str, escaped: &str) -> Result<Self> {
        transport.command(&format!("notify {escaped}"))?;
        tracing::debug!(path, "notify started");
        let stop = StopHandle {
            process: transport.process_handle(),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        Ok(Self {
            transport,
            path: path.to_string(),
            stop,
        })
    }

    /// Watched directory
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Feed every change to `callback` until it breaks or the stream is
    /// stopped
    ///
    /// Returns `Ok(())` after a stop; a failure line from the server or an
    /// unexpected end of the stream is an error.
    pub fn listen<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(ChangeEvent) -> ControlFlow<()>,
    {
        let stopped = Arc::clone(&self.stop.stopped);
        let base = self.path.clone();
        let mut failure = None;
        let outcome = self.transport.read_response_with(|line| {
            if stopped.load(Ordering::SeqCst) {
                return ControlFlow::Break(());
            }
            match parse_change_line(line, &base) {
                Ok(Some(event)) => callback(event),
                Ok(None) => ControlFlow::Continue(()),
                Err(err) => {
                    failure = Some(err);
                    ControlFlow::Break(())
                }
            }
        });

        if let Some(err) = failure {
            self.stop();
            return Err(err);
        }
        match outcome {
            Ok(ReadOutcome::Stopped) => {
                self.stop();
                Ok(())
            }
            _ if self.stop.is_stopped() => Ok(()),
            Ok(ReadOutcome::Delimited) => {
                self.transport.close(false);
                Ok(())
            }
            Ok(ReadOutcome::Closed) => {
                // reap the client so a late stop cannot signal a reused group
                self.transport.close(false);
                Err(SmbError::ConnectionFailed(format!(
                    "notify on {} ended unexpectedly",
                    self.path
                )))
            }
            Err(err) => Err(err),
        }
    }

    /// Force the dedicated transport closed
    pub fn stop(&mut self) {
        self.stop.stop();
        self.transport.close(true);
    }
}

impl std::fmt::Debug for NotifyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyStream")
            .field("path", &self.path)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}
