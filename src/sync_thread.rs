//! A background thread that keeps a slave in step with the master.
//!
//! Pushes from the master normally keep a slave current. The sync thread covers the rest: it checks
//! the master's data version periodically, resyncs from a full dump when the versions differ (a
//! missed push, a restart, a version gap), and refreshes the freshness stamp that gates client
//! reads.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{replication::Replicator, Error, Result};

/// A slave sync thread.
///
/// Use [`ConfigService::start_sync_thread`](crate::ConfigService::start_sync_thread) to get an
/// instance of it.
pub struct SyncThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the sync thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` until a sync round succeeds or fails unrecoverably, then the first such
    /// outcome.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl SyncThread {
    pub(crate) fn start(
        replicator: Arc<Replicator>,
        interval: Duration,
        jitter_range: Duration,
    ) -> std::io::Result<SyncThread> {
        // Buffer of 1 is enough: a second stop command can be dropped.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value| {
                let mut slot = result.0.lock().expect("sync result lock should not be poisoned");
                if slot.is_none() {
                    *slot = Some(value);
                }
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("confsync-sync".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                        log::debug!(target: "confsync", "checking master data version");
                        match replicator.sync_once() {
                            Ok(outcome) => {
                                log::debug!(target: "confsync", outcome:debug; "sync round finished");
                                update_result(Ok(()));
                            }
                            Err(err @ (Error::NotPermitted | Error::InvalidUrl(_))) => {
                                // Unrecoverable errors
                                log::warn!(target: "confsync", "stopping sync thread: {err}");
                                update_result(Err(err));
                                return;
                            }
                            Err(err) => {
                                // Retried on the next round.
                                log::warn!(target: "confsync", "sync with master failed: {err}");
                            }
                        }

                        let timeout = jitter(interval, jitter_range);
                        match stop_receiver.recv_timeout(timeout) {
                            Err(RecvTimeoutError::Timeout) => {}
                            Ok(()) => {
                                log::debug!(target: "confsync", "sync thread received stop command");
                                return;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                log::debug!(target: "confsync", "sync thread received disconnected");
                                return;
                            }
                        }
                    }));

                    // If catch_unwind returns Err, it means a panic occurred.
                    if result.is_err() {
                        update_result(Err(Error::ThreadPanicked));
                    }
                })?
        };

        Ok(SyncThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block until the first sync round has succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::ThreadPanicked`]
    /// - [`Error::NotPermitted`] if the node has no master to sync from.
    /// - [`Error::InvalidUrl`] if the master URL is invalid.
    pub fn wait_for_first_sync(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::ThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::ThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the sync thread without waiting for it to exit.
    pub fn stop(&self) {
        // Full buffer means a stop command is already pending; a dropped receiver means the thread
        // has exited.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the sync thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::ThreadPanicked)?;
        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
