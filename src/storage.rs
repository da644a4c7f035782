//! Durable storage collaborator.
//!
//! The server core issues exactly one [`Transaction`] per mutation. [`MemoryStorage`] is a
//! transactional in-process implementation used by tests and single-node setups; SQL backends
//! implement the same traits.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    models::{App, ClientAttribute, ConfigEntry, DataVersion, Entity, EntityKey, Node, User, Webhook},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    User,
    App,
    Config,
    Webhook,
    Node,
    DataVersion,
    ClientAttribute,
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    User(User),
    App(App),
    Config(ConfigEntry),
    Webhook(Webhook),
    Node(Node),
    DataVersion(DataVersion),
    ClientAttribute(ClientAttribute),
}

/// Unique key of a [`Record`] within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub key: String,
}

impl RecordKey {
    /// The single data-version row.
    pub fn data_version() -> RecordKey {
        RecordKey {
            kind: RecordKind::DataVersion,
            key: "current".to_owned(),
        }
    }
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::User(_) => RecordKind::User,
            Record::App(_) => RecordKind::App,
            Record::Config(_) => RecordKind::Config,
            Record::Webhook(_) => RecordKind::Webhook,
            Record::Node(_) => RecordKind::Node,
            Record::DataVersion(_) => RecordKind::DataVersion,
            Record::ClientAttribute(_) => RecordKind::ClientAttribute,
        }
    }

    pub fn unique_key(&self) -> RecordKey {
        let key = match self {
            Record::User(user) => user.name.clone(),
            Record::App(app) => app.key.clone(),
            Record::Config(config) => config.key.clone(),
            Record::Webhook(webhook) => webhook.key.clone(),
            Record::Node(node) => node.url.clone(),
            Record::DataVersion(_) => return RecordKey::data_version(),
            Record::ClientAttribute(attr) => {
                format!("{}\u{1f}{}\u{1f}{}", attr.app_key, attr.attribute, attr.value)
            }
        };
        RecordKey {
            kind: self.kind(),
            key,
        }
    }
}

impl From<Entity> for Record {
    fn from(entity: Entity) -> Record {
        match entity {
            Entity::User(user) => Record::User(user),
            Entity::App(app) => Record::App(app),
            Entity::Config(config) => Record::Config(config),
            Entity::Webhook(webhook) => Record::Webhook(webhook),
            Entity::Node(node) => Record::Node(node),
        }
    }
}

impl From<&EntityKey> for RecordKey {
    fn from(key: &EntityKey) -> RecordKey {
        let kind = match key {
            EntityKey::User(_) => RecordKind::User,
            EntityKey::App(_) => RecordKind::App,
            EntityKey::Config(_) => RecordKind::Config,
            EntityKey::Webhook(_) => RecordKind::Webhook,
            EntityKey::Node(_) => RecordKind::Node,
        };
        RecordKey {
            kind,
            key: key.as_str().to_owned(),
        }
    }
}

/// Transactional durable store.
pub trait Storage: Send + Sync {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;

    fn find_all(&self, kind: RecordKind) -> Result<Vec<Record>>;
}

/// An open transaction. Nothing is visible to [`Storage::find_all`] until [`commit`].
///
/// [`commit`]: Transaction::commit
pub trait Transaction {
    /// Insert a new record. Fails at commit if the key already exists.
    fn insert(&mut self, record: Record) -> Result<()>;

    /// Replace the record stored under `key`. Fails at commit if it doesn't exist.
    fn update_where(&mut self, key: &RecordKey, record: Record) -> Result<()>;

    /// Delete the record stored under `key`, if any.
    fn delete_where(&mut self, key: &RecordKey) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>);
}

/// In-memory [`Storage`] with all-or-nothing commits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: Mutex<BTreeMap<RecordKey, Record>>,
    fail_next_commit: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    /// Make the next commit fail. Used to exercise rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &RecordKey) -> Option<Record> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<RecordKey, Record>> {
        self.rows
            .lock()
            .expect("thread holding storage lock should not panic")
    }
}

enum Op {
    Insert(Record),
    Update(RecordKey, Record),
    Delete(RecordKey),
}

struct MemoryTransaction<'a> {
    storage: &'a MemoryStorage,
    ops: Vec<Op>,
}

impl Storage for MemoryStorage {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            storage: self,
            ops: Vec::new(),
        }))
    }

    fn find_all(&self, kind: RecordKind) -> Result<Vec<Record>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn insert(&mut self, record: Record) -> Result<()> {
        self.ops.push(Op::Insert(record));
        Ok(())
    }

    fn update_where(&mut self, key: &RecordKey, record: Record) -> Result<()> {
        if record.unique_key() != *key {
            return Err(Error::Persistence(format!(
                "record key does not match {key:?}"
            )));
        }
        self.ops.push(Op::Update(key.clone(), record));
        Ok(())
    }

    fn delete_where(&mut self, key: &RecordKey) -> Result<()> {
        self.ops.push(Op::Delete(key.clone()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let storage = self.storage;
        if storage.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Persistence("commit failed".to_owned()));
        }

        let mut rows = storage.lock();
        // Apply to a copy so a failing op leaves the table untouched.
        let mut staged = rows.clone();
        for op in self.ops {
            match op {
                Op::Insert(record) => {
                    let key = record.unique_key();
                    if staged.contains_key(&key) {
                        return Err(Error::Persistence(format!("duplicate key {key:?}")));
                    }
                    staged.insert(key, record);
                }
                Op::Update(key, record) => match staged.get_mut(&key) {
                    Some(slot) => *slot = record,
                    None => return Err(Error::Persistence(format!("no row for {key:?}"))),
                },
                Op::Delete(key) => {
                    staged.remove(&key);
                }
            }
        }
        *rows = staged;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}
