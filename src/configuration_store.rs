//! A thread-safe in-memory view of everything the server holds. [`ConfigurationStore`] provides
//! concurrent access for readers (config resolution, client handlers) and the single writer (the
//! replicator).
//!
//! [`Snapshot`]s are immutable once published. Entity maps are persistent (`im`) maps, so cloning a
//! snapshot is cheap and a mutation copies only the paths it touches. The next snapshot is built
//! outside the lock and swapped in, so a reader holding an older snapshot keeps seeing a consistent
//! state.
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, RwLock,
};

use chrono::{TimeZone, Utc};
use im::{HashMap, OrdMap, OrdSet};
use serde::{Deserialize, Serialize};

use crate::{
    models::{
        App, Change, CompiledConfig, ConfigEntry, DataVersion, Delta, Entity, EntityKey, Node,
        NodeRole, Timestamp, User, Webhook,
    },
    storage::{Record, RecordKind, Storage},
    Result,
};

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    data_version: DataVersion,
    users: HashMap<String, User>,
    apps: HashMap<String, App>,
    /// App name to app key.
    apps_by_name: HashMap<String, String>,
    configs: HashMap<String, Arc<CompiledConfig>>,
    /// App key to its config keys.
    app_configs: HashMap<String, OrdSet<String>>,
    webhooks: HashMap<String, Webhook>,
    nodes: OrdMap<String, Node>,
}

/// Serializable copy of a [`Snapshot`], used to bootstrap and resync slaves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dump {
    pub data_version: DataVersion,
    pub users: Vec<User>,
    pub apps: Vec<App>,
    pub configs: Vec<ConfigEntry>,
    pub webhooks: Vec<Webhook>,
    pub nodes: Vec<Node>,
}

impl Snapshot {
    /// Load all entities from durable storage.
    ///
    /// Returns `None` for the data version if storage has never been initialized.
    pub fn load(storage: &dyn Storage) -> Result<(Snapshot, Option<DataVersion>)> {
        let mut snapshot = Snapshot::default();
        for kind in [
            RecordKind::User,
            RecordKind::App,
            RecordKind::Config,
            RecordKind::Webhook,
            RecordKind::Node,
        ] {
            for record in storage.find_all(kind)? {
                let entity = match record {
                    Record::User(user) => Entity::User(user),
                    Record::App(app) => Entity::App(app),
                    Record::Config(config) => Entity::Config(config),
                    Record::Webhook(webhook) => Entity::Webhook(webhook),
                    Record::Node(node) => Entity::Node(node),
                    Record::DataVersion(_) | Record::ClientAttribute(_) => continue,
                };
                snapshot.apply(&Change::Upsert { entity });
            }
        }

        let data_version = storage
            .find_all(RecordKind::DataVersion)?
            .into_iter()
            .find_map(|record| match record {
                Record::DataVersion(dv) => Some(dv),
                _ => None,
            });
        if let Some(dv) = &data_version {
            snapshot.data_version = dv.clone();
        }

        Ok((snapshot, data_version))
    }

    pub fn from_dump(dump: Dump) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.data_version = dump.data_version.clone();
        for entity in dump.into_entities() {
            snapshot.apply(&Change::Upsert { entity });
        }
        snapshot
    }

    pub fn dump(&self) -> Dump {
        fn sorted<T: Clone>(map: &HashMap<String, T>) -> Vec<T> {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries.into_iter().map(|(_, v)| v.clone()).collect()
        }

        Dump {
            data_version: self.data_version.clone(),
            users: sorted(&self.users),
            apps: sorted(&self.apps),
            configs: sorted(&self.configs)
                .into_iter()
                .map(|config| config.entry.clone())
                .collect(),
            webhooks: sorted(&self.webhooks),
            nodes: self.nodes.values().cloned().collect(),
        }
    }

    /// Apply a single change, keeping the derived indexes in step.
    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::Upsert { entity } => self.upsert(entity.clone()),
            Change::Delete { key } => self.delete(key),
        }
    }

    fn upsert(&mut self, entity: Entity) {
        match entity {
            Entity::User(user) => {
                self.users.insert(user.name.clone(), user);
            }
            Entity::App(app) => {
                if let Some(previous) = self.apps.get(&app.key) {
                    if previous.name != app.name {
                        self.apps_by_name.remove(&previous.name);
                    }
                }
                self.apps_by_name.insert(app.name.clone(), app.key.clone());
                self.apps.insert(app.key.clone(), app);
            }
            Entity::Config(entry) => {
                if let Some(previous) = self.configs.get(&entry.key) {
                    if previous.entry.app_key != entry.app_key {
                        remove_from_index(
                            &mut self.app_configs,
                            &previous.entry.app_key,
                            &entry.key,
                        );
                    }
                }
                self.app_configs
                    .entry(entry.app_key.clone())
                    .or_insert_with(OrdSet::new)
                    .insert(entry.key.clone());
                self.configs
                    .insert(entry.key.clone(), Arc::new(CompiledConfig::compile(entry)));
            }
            Entity::Webhook(webhook) => {
                self.webhooks.insert(webhook.key.clone(), webhook);
            }
            Entity::Node(node) => {
                self.nodes.insert(node.url.clone(), node);
            }
        }
    }

    fn delete(&mut self, key: &EntityKey) {
        match key {
            EntityKey::User(name) => {
                self.users.remove(name);
            }
            EntityKey::App(key) => {
                if let Some(app) = self.apps.remove(key) {
                    self.apps_by_name.remove(&app.name);
                }
                self.app_configs.remove(key);
            }
            EntityKey::Config(key) => {
                if let Some(config) = self.configs.remove(key) {
                    remove_from_index(&mut self.app_configs, &config.entry.app_key, key);
                }
            }
            EntityKey::Webhook(key) => {
                self.webhooks.remove(key);
            }
            EntityKey::Node(url) => {
                self.nodes.remove(url);
            }
        }
    }

    pub fn data_version(&self) -> &DataVersion {
        &self.data_version
    }

    pub(crate) fn set_data_version(&mut self, data_version: DataVersion) {
        self.data_version = data_version;
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn app(&self, key: &str) -> Option<&App> {
        self.apps.get(key)
    }

    pub fn app_by_name(&self, name: &str) -> Option<&App> {
        self.apps_by_name.get(name).and_then(|key| self.apps.get(key))
    }

    /// Look an app up by key, falling back to its name.
    pub fn find_app(&self, key_or_name: &str) -> Option<&App> {
        self.app(key_or_name).or_else(|| self.app_by_name(key_or_name))
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.apps.values()
    }

    pub fn config(&self, key: &str) -> Option<&Arc<CompiledConfig>> {
        self.configs.get(key)
    }

    /// Configs of an app, ordered by config key.
    pub fn app_configs(&self, app_key: &str) -> impl Iterator<Item = &Arc<CompiledConfig>> {
        self.app_configs
            .get(app_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.configs.get(key))
    }

    pub fn webhook(&self, key: &str) -> Option<&Webhook> {
        self.webhooks.get(key)
    }

    pub fn webhooks(&self) -> impl Iterator<Item = &Webhook> {
        self.webhooks.values()
    }

    pub fn node(&self, url: &str) -> Option<&Node> {
        self.nodes.get(url)
    }

    /// Nodes ordered by URL.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn master(&self) -> Option<&Node> {
        self.nodes.values().find(|node| node.role == NodeRole::Master)
    }

    pub fn slaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|node| node.role == NodeRole::Slave)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        match key {
            EntityKey::User(k) => self.users.contains_key(k),
            EntityKey::App(k) => self.apps.contains_key(k),
            EntityKey::Config(k) => self.configs.contains_key(k),
            EntityKey::Webhook(k) => self.webhooks.contains_key(k),
            EntityKey::Node(k) => self.nodes.contains_key(k),
        }
    }
}

impl Dump {
    /// All entities, users first and nodes last.
    pub fn into_entities(self) -> impl Iterator<Item = Entity> {
        self.users
            .into_iter()
            .map(Entity::User)
            .chain(self.apps.into_iter().map(Entity::App))
            .chain(self.configs.into_iter().map(Entity::Config))
            .chain(self.webhooks.into_iter().map(Entity::Webhook))
            .chain(self.nodes.into_iter().map(Entity::Node))
    }
}

fn remove_from_index(index: &mut HashMap<String, OrdSet<String>>, app_key: &str, key: &str) {
    if let Some(keys) = index.get_mut(app_key) {
        keys.remove(key);
        if keys.is_empty() {
            index.remove(app_key);
        }
    }
}

/// `ConfigurationStore` holds the current [`Snapshot`] and the slave freshness stamp.
pub struct ConfigurationStore {
    snapshot: RwLock<Arc<Snapshot>>,
    /// Milliseconds since epoch of the last successful check against the master. 0 if never.
    last_checked_at: AtomicI64,
}

impl ConfigurationStore {
    pub fn new(snapshot: Snapshot) -> ConfigurationStore {
        ConfigurationStore {
            snapshot: RwLock::new(Arc::new(snapshot)),
            last_checked_at: AtomicI64::new(0),
        }
    }

    /// Get the current snapshot. The read lock is held only while cloning the `Arc`.
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .expect("thread holding configuration lock should not panic")
            .clone()
    }

    pub fn data_version(&self) -> DataVersion {
        self.get_snapshot().data_version.clone()
    }

    /// Apply `delta` and advance to `data_version` as one step. Readers see either the state before
    /// or the state after.
    ///
    /// Callers serialize writes; the replicator holds its write lock around this.
    pub fn apply(&self, delta: &Delta, data_version: DataVersion) {
        // Structural sharing keeps the clone cheap; only touched paths are copied.
        let mut next = Snapshot::clone(&self.get_snapshot());
        for change in &delta.changes {
            next.apply(change);
        }
        next.data_version = data_version;
        self.replace(next);
    }

    /// Replace the whole snapshot, returning the previous one.
    pub fn replace(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let new_value = Arc::new(snapshot);
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding configuration lock should not panic");
        std::mem::replace(&mut *slot, new_value)
    }

    pub fn mark_checked(&self, at: Timestamp) {
        self.last_checked_at
            .store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn last_checked_at(&self) -> Option<Timestamp> {
        match self.last_checked_at.load(Ordering::Acquire) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }
}
