//! Best-effort recording of client attribute values seen per app.
//!
//! Request handlers call [`TelemetryRecorder::record`], which never blocks: observations go into a
//! bounded queue and are dropped when it is full. A single background thread drains the queue and
//! persists values it hasn't seen before as [`ClientAttribute`] records.
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{Receiver, SyncSender, TrySendError},
        Arc, Mutex,
    },
};

use crate::{
    context::{Attribute, ClientContext},
    models::ClientAttribute,
    storage::{Record, RecordKind, Storage},
    Error, Result,
};

/// Attributes worth aggregating. IPs and device ids are too high-cardinality to keep.
const RECORDED_ATTRIBUTES: [Attribute; 6] = [
    Attribute::OsType,
    Attribute::OsVersion,
    Attribute::AppVersion,
    Attribute::Lang,
    Attribute::Timezone,
    Attribute::Network,
];

enum Message {
    Observe(Vec<ClientAttribute>),
    Flush(SyncSender<()>),
}

pub struct TelemetryRecorder {
    sender: SyncSender<Message>,
    join_handle: std::thread::JoinHandle<()>,
    known: Arc<Mutex<HashSet<ClientAttribute>>>,
    dropped: AtomicU64,
    /// Set while events are being dropped, so a burst logs one warning.
    overflowing: AtomicBool,
}

impl TelemetryRecorder {
    /// Start the consumer thread. Values already in `storage` are treated as known.
    pub fn start(storage: Arc<dyn Storage>, capacity: usize) -> Result<TelemetryRecorder> {
        let known: HashSet<ClientAttribute> = storage
            .find_all(RecordKind::ClientAttribute)?
            .into_iter()
            .filter_map(|record| match record {
                Record::ClientAttribute(attr) => Some(attr),
                _ => None,
            })
            .collect();
        let known = Arc::new(Mutex::new(known));

        let (sender, receiver) = std::sync::mpsc::sync_channel(capacity);
        let join_handle = {
            let known = Arc::clone(&known);
            std::thread::Builder::new()
                .name("confsync-telemetry".to_owned())
                .spawn(move || consume(receiver, &*storage, &known))?
        };

        Ok(TelemetryRecorder {
            sender,
            join_handle,
            known,
            dropped: AtomicU64::new(0),
            overflowing: AtomicBool::new(false),
        })
    }

    /// Queue the recorded attributes of `ctx` for `app_key`. Dropped if the queue is full.
    pub fn record(&self, app_key: &str, ctx: &ClientContext) {
        if app_key.is_empty() {
            return;
        }
        let observed: Vec<ClientAttribute> = RECORDED_ATTRIBUTES
            .iter()
            .filter(|attr| !ctx.get(**attr).is_empty())
            .map(|attr| ClientAttribute {
                app_key: app_key.to_owned(),
                attribute: attr.name().to_owned(),
                value: ctx.get(*attr).to_owned(),
            })
            .collect();
        if observed.is_empty() {
            return;
        }

        match self.sender.try_send(Message::Observe(observed)) {
            Ok(()) => {
                if self.overflowing.swap(false, Ordering::Relaxed) {
                    log::debug!(target: "confsync", dropped = self.dropped(); "telemetry queue drained");
                }
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    log::warn!(target: "confsync", app_key; "telemetry queue is full, dropping events");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of events dropped because the queue was full or the consumer had exited.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Values recorded for `attribute` of `app_key`, sorted.
    pub fn known_values(&self, app_key: &str, attribute: Attribute) -> Vec<String> {
        let known = self
            .known
            .lock()
            .expect("thread holding telemetry lock should not panic");
        let mut values: Vec<String> = known
            .iter()
            .filter(|attr| attr.app_key == app_key && attr.attribute == attribute.name())
            .map(|attr| attr.value.clone())
            .collect();
        values.sort();
        values
    }

    /// Block until everything queued so far has been processed.
    pub fn flush(&self) -> Result<()> {
        let (ack_sender, ack_receiver) = std::sync::mpsc::sync_channel(1);
        self.sender
            .send(Message::Flush(ack_sender))
            .map_err(|_| Error::ThreadPanicked)?;
        ack_receiver.recv().map_err(|_| Error::ThreadPanicked)
    }

    /// Drain the queue and stop the consumer thread.
    pub fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.join_handle
            .join()
            .map_err(|_| Error::ThreadPanicked)
    }
}

fn consume(
    receiver: Receiver<Message>,
    storage: &dyn Storage,
    known: &Mutex<HashSet<ClientAttribute>>,
) {
    // Ends once every sender is dropped and the queue is drained.
    for message in receiver {
        match message {
            Message::Observe(observed) => {
                for attr in observed {
                    let is_new = known
                        .lock()
                        .expect("thread holding telemetry lock should not panic")
                        .insert(attr.clone());
                    if !is_new {
                        continue;
                    }
                    if let Err(err) = persist(storage, &attr) {
                        log::warn!(target: "confsync",
                                   app_key:display = attr.app_key,
                                   attribute:display = attr.attribute;
                                   "failed to persist client attribute: {err}");
                        // Retry next time the value shows up.
                        known
                            .lock()
                            .expect("thread holding telemetry lock should not panic")
                            .remove(&attr);
                    }
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    log::debug!(target: "confsync", "telemetry thread exiting");
}

fn persist(storage: &dyn Storage, attr: &ClientAttribute) -> Result<()> {
    let mut tx = storage.begin()?;
    if let Err(err) = tx.insert(Record::ClientAttribute(attr.clone())) {
        tx.rollback();
        return Err(err);
    }
    tx.commit()
}
