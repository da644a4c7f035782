//! Serialized mutations, the data-version chain, and master to slave replication.
//!
//! Every accepted mutation runs under one process-wide write lock:
//!
//! 1. the delta and the next [`DataVersion`] are written to durable storage in one transaction;
//! 2. only after the commit succeeds is the in-memory [`Snapshot`] advanced;
//! 3. on the master, the delta is pushed to every slave. Push failures are reported, not rolled
//!    back.
//!
//! Slaves accept a pushed delta only if it directly extends their chain. Otherwise they resync
//! from a full dump of the master.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;

use crate::{
    config::ServerConfig,
    configuration_store::{ConfigurationStore, Dump, Snapshot},
    models::{Change, DataVersion, Delta, Entity, EntityKey, Node, NodeRole},
    storage::{Record, RecordKey, Storage, Transaction},
    transport::{PeerTransport, PushPayload},
    Error, Result,
};

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub data_version: DataVersion,
    /// Slaves the delta could not be pushed to. They catch up on their next sync.
    pub failed_nodes: Vec<String>,
}

/// What a slave sync round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Already at the master's version.
    UpToDate,
    /// Local state was replaced with the master's dump.
    Resynced,
}

pub struct Replicator {
    local_url: String,
    role: NodeRole,
    master_url: Option<String>,
    store: Arc<ConfigurationStore>,
    storage: Arc<dyn Storage>,
    transport: Arc<dyn PeerTransport>,
    write_lock: Mutex<()>,
}

impl Replicator {
    /// Load state from storage and, on the master, claim the master slot in the node registry.
    ///
    /// Fresh storage is initialized at version 0. A fresh master registers itself in that same
    /// transaction, so the first operator mutation produces version 1. On existing storage, claiming
    /// the slot is an ordinary mutation when the master row needs to change.
    ///
    /// Fails with [`Error::MasterConflict`] if another master is registered, unless
    /// [`ServerConfig::replace_master`] is set, in which case the other master's row is removed.
    pub fn bootstrap(
        config: &ServerConfig,
        store: Arc<ConfigurationStore>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Replicator> {
        let (mut snapshot, data_version) = Snapshot::load(&*storage)?;
        if data_version.is_none() {
            let initial = DataVersion::initial();
            let mut records = vec![Record::DataVersion(initial.clone())];
            if config.role == NodeRole::Master {
                let node = Node {
                    url: config.local_url.clone(),
                    role: NodeRole::Master,
                    last_check_utc: Some(initial.updated_at),
                    data_version: initial.version,
                };
                snapshot.apply(&Change::Upsert {
                    entity: Entity::Node(node.clone()),
                });
                records.push(Record::Node(node));
            }

            let mut tx = storage.begin()?;
            for record in records {
                if let Err(err) = tx.insert(record) {
                    tx.rollback();
                    return Err(err);
                }
            }
            tx.commit()?;
            snapshot.set_data_version(initial);
        }
        log::debug!(target: "confsync",
                    url:display = config.local_url,
                    version = snapshot.data_version().version;
                    "loaded state from storage");
        store.replace(snapshot);

        let replicator = Replicator {
            local_url: config.local_url.clone(),
            role: config.role,
            master_url: config.master_url.clone(),
            store,
            storage,
            transport,
            write_lock: Mutex::new(()),
        };

        if replicator.role == NodeRole::Master {
            replicator.claim_master(config.replace_master)?;
        }

        Ok(replicator)
    }

    fn claim_master(&self, replace: bool) -> Result<()> {
        self.mutate_with(None, |snapshot| {
            let mut delta = Delta::default();
            if let Some(master) = snapshot.master() {
                if master.url != self.local_url {
                    if !replace {
                        return Err(Error::MasterConflict {
                            url: master.url.clone(),
                        });
                    }
                    log::warn!(target: "confsync", url:display = master.url; "removing registered master");
                    delta = delta.and_delete(EntityKey::Node(master.url.clone()));
                }
            }
            match snapshot.node(&self.local_url) {
                Some(node) if node.role == NodeRole::Master && delta.changes.is_empty() => {}
                _ => {
                    delta = delta.and_upsert(Entity::Node(Node {
                        url: self.local_url.clone(),
                        role: NodeRole::Master,
                        last_check_utc: Some(Utc::now()),
                        data_version: snapshot.data_version().version,
                    }));
                }
            }
            Ok(delta)
        })
        .map(|_| ())
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn local_url(&self) -> &str {
        &self.local_url
    }

    pub fn master_url(&self) -> Option<&str> {
        self.master_url.as_deref()
    }

    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    /// Commit `delta` as the next data version.
    ///
    /// If `expected` is given and differs from the current version, fails with
    /// [`Error::VersionConflict`] without touching anything.
    pub fn mutate(&self, delta: Delta, expected: Option<i64>) -> Result<MutationOutcome> {
        self.mutate_with(expected, |_| Ok(delta))
    }

    /// Like [`mutate`](Replicator::mutate), but the delta is built from the current snapshot while
    /// the write lock is held, so read-modify-write changes can't race.
    ///
    /// An empty delta commits nothing and returns the current version.
    pub fn mutate_with<F>(&self, expected: Option<i64>, build: F) -> Result<MutationOutcome>
    where
        F: FnOnce(&Snapshot) -> Result<Delta>,
    {
        if self.role != NodeRole::Master {
            return Err(Error::NotPermitted);
        }

        let _guard = self
            .write_lock
            .lock()
            .expect("thread holding write lock should not panic");

        let current = self.store.get_snapshot();
        let current_version = current.data_version();
        if let Some(expected) = expected {
            if expected != current_version.version {
                return Err(Error::VersionConflict {
                    expected,
                    current: current_version.version,
                });
            }
        }

        let mut delta = build(&current)?;
        if delta.changes.is_empty() {
            return Ok(MutationOutcome {
                data_version: current_version.clone(),
                failed_nodes: Vec::new(),
            });
        }

        let next = current_version.next();
        self.touch_local_node(&current, &mut delta, &next);

        self.persist(&current, &delta, &next)?;
        self.store.apply(&delta, next.clone());
        log::debug!(target: "confsync",
                    version = next.version,
                    changes = delta.changes.len();
                    "committed mutation");

        let failed_nodes = self.push_to_slaves(&self.store.get_snapshot(), &delta, &next);

        Ok(MutationOutcome {
            data_version: next,
            failed_nodes,
        })
    }

    /// Point the local node row at `next`. If the delta already rewrites the row, its pointer is
    /// set there; if it removes the row, nothing is added.
    fn touch_local_node(&self, current: &Snapshot, delta: &mut Delta, next: &DataVersion) {
        let local_key = EntityKey::Node(self.local_url.clone());
        let touched = delta.changes.iter().any(|change| match change {
            Change::Upsert { entity } => entity.key() == local_key,
            Change::Delete { key } => *key == local_key,
        });
        if touched {
            for change in &mut delta.changes {
                if let Change::Upsert {
                    entity: Entity::Node(node),
                } = change
                {
                    if node.url == self.local_url {
                        node.data_version = next.version;
                    }
                }
            }
            return;
        }

        if let Some(node) = current.node(&self.local_url) {
            delta.changes.push(Change::Upsert {
                entity: Entity::Node(Node {
                    data_version: next.version,
                    last_check_utc: Some(next.updated_at),
                    ..node.clone()
                }),
            });
        }
    }

    /// Write `delta` and the `next` version row in one transaction.
    fn persist(&self, current: &Snapshot, delta: &Delta, next: &DataVersion) -> Result<()> {
        let mut tx = self.storage.begin()?;
        match write_changes(&mut *tx, current, &delta.changes, next) {
            Ok(()) => tx.commit(),
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
        .inspect_err(|err| {
            log::warn!(target: "confsync", version = next.version; "failed to persist mutation: {err}");
        })
    }

    fn push_to_slaves(&self, snapshot: &Snapshot, delta: &Delta, next: &DataVersion) -> Vec<String> {
        let targets: Vec<&str> = snapshot
            .slaves()
            .map(|node| node.url.as_str())
            .filter(|url| *url != self.local_url)
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }

        let payload = PushPayload {
            delta: delta.clone(),
            data_version: next.clone(),
        };
        let payload = &payload;
        let transport = &*self.transport;

        std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|url| (*url, scope.spawn(move || transport.push(url, payload))))
                .collect();

            handles
                .into_iter()
                .filter_map(|(url, handle)| {
                    let result = handle.join().unwrap_or(Err(Error::ThreadPanicked));
                    match result {
                        Ok(()) => None,
                        Err(err) => {
                            log::warn!(target: "confsync", url:display = url, version = next.version; "failed to push delta: {err}");
                            Some(url.to_owned())
                        }
                    }
                })
                .collect()
        })
    }

    /// Apply a delta pushed by the master.
    ///
    /// Fails with [`Error::VersionGap`] unless the delta directly follows the local version.
    /// Re-delivery of the delta that produced the current version is accepted as a no-op.
    pub fn apply_replicated(&self, payload: &PushPayload) -> Result<()> {
        if self.role == NodeRole::Master {
            return Err(Error::NotPermitted);
        }

        let _guard = self
            .write_lock
            .lock()
            .expect("thread holding write lock should not panic");

        let current = self.store.get_snapshot();
        let local = current.data_version();
        if *local == payload.data_version {
            self.store.mark_checked(Utc::now());
            return Ok(());
        }
        if !local.is_followed_by(&payload.data_version) {
            log::warn!(target: "confsync",
                       local = local.version,
                       received = payload.data_version.version;
                       "pushed delta does not extend local version chain");
            return Err(Error::VersionGap {
                local: local.version,
                received: payload.data_version.version,
            });
        }

        let mut delta = payload.delta.clone();
        self.touch_local_node(&current, &mut delta, &payload.data_version);

        self.persist(&current, &delta, &payload.data_version)?;
        self.store.apply(&delta, payload.data_version.clone());
        self.store.mark_checked(Utc::now());
        log::debug!(target: "confsync", version = payload.data_version.version; "applied replicated delta");
        Ok(())
    }

    /// Replace local state with `dump`, in storage and in memory.
    ///
    /// A dump that is behind the local version, or is the local version, changes nothing and
    /// returns [`SyncOutcome::UpToDate`]. That happens when pushes land between fetching the dump and
    /// applying it.
    pub fn resync(&self, mut dump: Dump) -> Result<SyncOutcome> {
        if self.role == NodeRole::Master {
            return Err(Error::NotPermitted);
        }

        let _guard = self
            .write_lock
            .lock()
            .expect("thread holding write lock should not panic");

        let current = self.store.get_snapshot();
        let local = current.data_version();
        if dump.data_version.version < local.version || dump.data_version == *local {
            log::debug!(target: "confsync",
                        local = local.version,
                        received = dump.data_version.version;
                        "ignoring dump that does not advance local version");
            self.store.mark_checked(Utc::now());
            return Ok(SyncOutcome::UpToDate);
        }

        let now = Utc::now();
        for node in dump.nodes.iter_mut().filter(|node| node.url == self.local_url) {
            node.data_version = dump.data_version.version;
            node.last_check_utc = Some(now);
        }
        let target = Snapshot::from_dump(dump.clone());

        let mut changes: Vec<Change> = current
            .dump()
            .into_entities()
            .map(|entity| entity.key())
            .filter(|key| !target.contains(key))
            .map(|key| Change::Delete { key })
            .collect();
        changes.extend(
            dump.clone()
                .into_entities()
                .map(|entity| Change::Upsert { entity }),
        );

        self.persist(&current, &Delta { changes }, &dump.data_version)?;
        self.store.replace(target);
        self.store.mark_checked(now);
        log::debug!(target: "confsync", version = dump.data_version.version; "resynced from master");
        Ok(SyncOutcome::Resynced)
    }

    /// One slave sync round: compare versions with the master and resync if they differ.
    pub fn sync_once(&self) -> Result<SyncOutcome> {
        let master_url = self.master_url.as_deref().ok_or(Error::NotPermitted)?;

        let remote = self.transport.fetch_version(master_url)?;
        let local = self.store.data_version();
        if remote == local {
            self.store.mark_checked(Utc::now());
            return Ok(SyncOutcome::UpToDate);
        }

        log::debug!(target: "confsync",
                    local = local.version,
                    remote = remote.version;
                    "local version differs from master, resyncing");
        let dump = self.transport.fetch_dump(master_url)?;
        self.resync(dump)
    }
}

/// Stage `changes` and the version row. Rows are inserted or updated depending on whether they
/// exist in `current`, as modified by earlier changes in the same batch.
fn write_changes(
    tx: &mut dyn Transaction,
    current: &Snapshot,
    changes: &[Change],
    next: &DataVersion,
) -> Result<()> {
    let mut exists: HashMap<EntityKey, bool> = HashMap::new();
    for change in changes {
        match change {
            Change::Upsert { entity } => {
                let key = entity.key();
                let present = exists
                    .get(&key)
                    .copied()
                    .unwrap_or_else(|| current.contains(&key));
                let record = Record::from(entity.clone());
                if present {
                    tx.update_where(&RecordKey::from(&key), record)?;
                } else {
                    tx.insert(record)?;
                }
                exists.insert(key, true);
            }
            Change::Delete { key } => {
                tx.delete_where(&RecordKey::from(key))?;
                exists.insert(key.clone(), false);
            }
        }
    }
    tx.update_where(&RecordKey::data_version(), Record::DataVersion(next.clone()))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{MutationOutcome, Replicator, SyncOutcome};
    use crate::{
        config::ServerConfig,
        configuration_store::{ConfigurationStore, Dump, Snapshot},
        models::{App, AppType, DataVersion, Delta, Entity, EntityKey, Node, NodeRole},
        storage::{MemoryStorage, Record, RecordKey, RecordKind, Storage},
        transport::{PeerTransport, PushPayload},
        Error, Result,
    };

    #[derive(Default)]
    struct RecordingTransport {
        pushes: Mutex<Vec<(String, PushPayload)>>,
        unreachable: Vec<String>,
    }

    impl PeerTransport for RecordingTransport {
        fn push(&self, node_url: &str, payload: &PushPayload) -> Result<()> {
            if self.unreachable.iter().any(|url| url == node_url) {
                return Err(Error::Remote {
                    code: "UNREACHABLE".into(),
                    msg: node_url.into(),
                });
            }
            self.pushes
                .lock()
                .unwrap()
                .push((node_url.to_owned(), payload.clone()));
            Ok(())
        }

        fn fetch_version(&self, _node_url: &str) -> Result<DataVersion> {
            unimplemented!()
        }

        fn fetch_dump(&self, _node_url: &str) -> Result<Dump> {
            unimplemented!()
        }
    }

    fn master(storage: Arc<MemoryStorage>, transport: Arc<RecordingTransport>) -> Replicator {
        Replicator::bootstrap(
            &ServerConfig::master("http://master"),
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            storage,
            transport,
        )
        .unwrap()
    }

    fn slave_node(url: &str) -> Entity {
        Entity::Node(Node {
            url: url.into(),
            role: NodeRole::Slave,
            last_check_utc: None,
            data_version: 0,
        })
    }

    #[test]
    fn bootstrap_registers_master() {
        let storage = Arc::new(MemoryStorage::new());
        let replicator = master(storage.clone(), Default::default());

        let snapshot = replicator.store().get_snapshot();
        assert_eq!(snapshot.master().map(|n| n.url.as_str()), Some("http://master"));
        assert_eq!(snapshot.data_version().version, 0);
        assert!(storage.get(&RecordKey::data_version()).is_some());
        assert_eq!(storage.find_all(RecordKind::Node).unwrap().len(), 1);

        let first = replicator
            .mutate(
                Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
                None,
            )
            .unwrap();
        assert_eq!(first.data_version.version, 1);
    }

    #[test]
    fn restart_keeps_version() {
        let storage = Arc::new(MemoryStorage::new());
        let version = {
            let replicator = master(storage.clone(), Default::default());
            replicator
                .mutate(
                    Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
                    None,
                )
                .unwrap()
                .data_version
        };

        let replicator = master(storage, Default::default());
        let snapshot = replicator.store().get_snapshot();
        assert_eq!(*snapshot.data_version(), version);
        assert!(snapshot.app("k").is_some());
    }

    #[test]
    fn second_master_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        master(storage.clone(), Default::default());

        let mut config = ServerConfig::master("http://other");
        let result = Replicator::bootstrap(
            &config,
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            storage.clone(),
            Arc::new(RecordingTransport::default()),
        );
        assert!(matches!(result, Err(Error::MasterConflict { url }) if url == "http://master"));

        config.replace_master(true);
        let replicator = Replicator::bootstrap(
            &config,
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            storage,
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        let snapshot = replicator.store().get_snapshot();
        assert_eq!(snapshot.master().map(|n| n.url.as_str()), Some("http://other"));
        assert!(snapshot.node("http://master").is_none());
    }

    #[test]
    fn version_chain_after_mutations() {
        let replicator = master(Arc::new(MemoryStorage::new()), Default::default());
        let start = replicator.store().data_version();

        let mut previous = start.clone();
        for i in 0..5 {
            let MutationOutcome { data_version, .. } = replicator
                .mutate(
                    Delta::upsert(Entity::App(App::new(format!("k{i}"), format!("n{i}"), AppType::Real))),
                    None,
                )
                .unwrap();
            assert_eq!(data_version.old_sign, previous.sign);
            assert_eq!(data_version.version, previous.version + 1);
            previous = data_version;
        }
        assert_eq!(previous.version, start.version + 5);

        let local = replicator.store().get_snapshot();
        assert_eq!(local.node("http://master").unwrap().data_version, previous.version);
    }

    #[test]
    fn expected_version_conflict() {
        let replicator = master(Arc::new(MemoryStorage::new()), Default::default());
        let current = replicator.store().data_version().version;
        let result = replicator.mutate(
            Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
            Some(current + 3),
        );
        assert!(matches!(result, Err(Error::VersionConflict { .. })));
        assert!(replicator
            .mutate(
                Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
                Some(current)
            )
            .is_ok());
    }

    #[test]
    fn failed_commit_leaves_memory_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        let replicator = master(storage.clone(), Default::default());
        let before = replicator.store().data_version();

        storage.fail_next_commit();
        let result = replicator.mutate(
            Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
            None,
        );
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(replicator.store().data_version(), before);
        assert!(replicator.store().get_snapshot().app("k").is_none());
        assert!(storage.find_all(RecordKind::App).unwrap().is_empty());
    }

    #[test]
    fn pushes_to_slaves_and_reports_failures() {
        let transport = Arc::new(RecordingTransport {
            unreachable: vec!["http://down".into()],
            ..Default::default()
        });
        let replicator = master(Arc::new(MemoryStorage::new()), transport.clone());
        replicator
            .mutate(
                Delta::upsert(slave_node("http://up")).and_upsert(slave_node("http://down")),
                None,
            )
            .unwrap();

        let outcome = replicator
            .mutate(
                Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
                None,
            )
            .unwrap();
        assert_eq!(outcome.failed_nodes, vec!["http://down".to_owned()]);

        let pushes = transport.pushes.lock().unwrap();
        let last = pushes.last().unwrap();
        assert_eq!(last.0, "http://up");
        assert_eq!(last.1.data_version, outcome.data_version);
    }

    #[test]
    fn slave_rejects_writes() {
        let replicator = Replicator::bootstrap(
            &ServerConfig::slave("http://slave", "http://master"),
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            Arc::new(MemoryStorage::new()),
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        assert!(matches!(
            replicator.mutate(Delta::delete(EntityKey::App("k".into())), None),
            Err(Error::NotPermitted)
        ));
    }

    #[test]
    fn slave_applies_chain_and_detects_gaps() {
        let storage = Arc::new(MemoryStorage::new());
        let replicator = Replicator::bootstrap(
            &ServerConfig::slave("http://slave", "http://master"),
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            storage.clone(),
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();

        let v0 = replicator.store().data_version();
        let v1 = v0.next();
        let payload = PushPayload {
            delta: Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
            data_version: v1.clone(),
        };
        replicator.apply_replicated(&payload).unwrap();
        // Re-delivery is harmless.
        replicator.apply_replicated(&payload).unwrap();
        assert_eq!(replicator.store().data_version(), v1);
        assert!(replicator.store().last_checked_at().is_some());
        assert!(matches!(
            storage.get(&RecordKey::data_version()),
            Some(Record::DataVersion(dv)) if dv == v1
        ));

        let v3 = v1.next().next();
        let result = replicator.apply_replicated(&PushPayload {
            delta: Delta::default(),
            data_version: v3,
        });
        assert!(matches!(result, Err(Error::VersionGap { local: 1, received: 3 })));
    }

    #[test]
    fn resync_replaces_storage_and_memory() {
        let storage = Arc::new(MemoryStorage::new());
        let replicator = Replicator::bootstrap(
            &ServerConfig::slave("http://slave", "http://master"),
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            storage.clone(),
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        let v1 = replicator.store().data_version().next();
        replicator
            .apply_replicated(&PushPayload {
                delta: Delta::upsert(Entity::App(App::new("old", "old", AppType::Real))),
                data_version: v1,
            })
            .unwrap();

        let dump = Dump {
            data_version: DataVersion::initial().next().next(),
            apps: vec![App::new("new", "new", AppType::Real)],
            ..Default::default()
        };
        replicator.resync(dump.clone()).unwrap();

        let snapshot = replicator.store().get_snapshot();
        assert!(snapshot.app("old").is_none());
        assert!(snapshot.app("new").is_some());
        assert_eq!(*snapshot.data_version(), dump.data_version);

        let (reloaded, version) = Snapshot::load(&*storage).unwrap();
        assert_eq!(version, Some(dump.data_version.clone()));
        assert_eq!(reloaded.dump(), dump);
    }

    fn slave(storage: Arc<MemoryStorage>) -> Replicator {
        Replicator::bootstrap(
            &ServerConfig::slave("http://slave", "http://master"),
            Arc::new(ConfigurationStore::new(Snapshot::default())),
            storage,
            Arc::new(RecordingTransport::default()),
        )
        .unwrap()
    }

    #[test]
    fn resync_ignores_dump_behind_local_version() {
        let replicator = slave(Arc::new(MemoryStorage::new()));
        let v1 = replicator.store().data_version().next();
        let v2 = v1.next();
        for (key, version) in [("a", &v1), ("b", &v2)] {
            replicator
                .apply_replicated(&PushPayload {
                    delta: Delta::upsert(Entity::App(App::new(key, key, AppType::Real))),
                    data_version: version.clone(),
                })
                .unwrap();
        }

        let behind = Dump {
            data_version: v1,
            apps: vec![App::new("a", "a", AppType::Real)],
            ..Default::default()
        };
        assert_eq!(replicator.resync(behind).unwrap(), SyncOutcome::UpToDate);

        let same = Dump {
            data_version: v2.clone(),
            ..replicator.store().get_snapshot().dump()
        };
        assert_eq!(replicator.resync(same).unwrap(), SyncOutcome::UpToDate);

        let snapshot = replicator.store().get_snapshot();
        assert_eq!(*snapshot.data_version(), v2);
        assert!(snapshot.app("a").is_some());
        assert!(snapshot.app("b").is_some());
    }

    #[test]
    fn slave_tracks_own_progress() {
        let storage = Arc::new(MemoryStorage::new());
        let replicator = slave(storage.clone());

        let v1 = replicator.store().data_version().next();
        replicator
            .apply_replicated(&PushPayload {
                delta: Delta::upsert(slave_node("http://slave")),
                data_version: v1.clone(),
            })
            .unwrap();
        let own = |replicator: &Replicator| {
            replicator
                .store()
                .get_snapshot()
                .node("http://slave")
                .map(|node| node.data_version)
        };
        assert_eq!(own(&replicator), Some(1));

        let v2 = v1.next();
        replicator
            .apply_replicated(&PushPayload {
                delta: Delta::upsert(Entity::App(App::new("k", "n", AppType::Real))),
                data_version: v2,
            })
            .unwrap();
        assert_eq!(own(&replicator), Some(2));
        assert!(matches!(
            storage.get(&RecordKey::from(&EntityKey::Node("http://slave".into()))),
            Some(Record::Node(node)) if node.data_version == 2
        ));

        let dump = Dump {
            data_version: DataVersion::initial().next().next().next().next(),
            nodes: vec![Node {
                url: "http://slave".into(),
                role: NodeRole::Slave,
                last_check_utc: None,
                data_version: 0,
            }],
            ..Default::default()
        };
        assert_eq!(replicator.resync(dump).unwrap(), SyncOutcome::Resynced);
        assert_eq!(own(&replicator), Some(4));
    }
}
