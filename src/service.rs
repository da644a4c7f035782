use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    config::ServerConfig,
    configuration_store::{ConfigurationStore, Dump, Snapshot},
    context::ClientContext,
    envelope::Envelope,
    matcher::{fingerprint, resolve, ResolvedConfigs},
    models::{
        fresh_token, App, AppType, ConfigEntry, ConfigValue, DataVersion, Delta, Entity, EntityKey,
        Node, NodeRole, User, Webhook,
    },
    pool::EvaluatorPool,
    replication::{MutationOutcome, Replicator, SyncOutcome},
    storage::Storage,
    sync_thread::SyncThread,
    telemetry::TelemetryRecorder,
    transport::{HttpTransport, PeerTransport, PushPayload},
    Error, Result,
};

/// Body of a successful config fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigsResponse {
    /// `None` if the client already holds the current `data_sign`.
    pub configs: Option<ResolvedConfigs>,
    pub data_sign: String,
    /// URLs of all known nodes, so clients can fail over.
    pub nodes: Vec<String>,
}

/// A configuration server node.
///
/// The service owns the in-memory store and exposes the read path used by clients, the write path
/// used by operators (master only), and the endpoints peers call during replication. Routing and
/// transport framing are left to the embedding HTTP layer; `handle_*` methods return ready-to-send
/// [`Envelope`]s.
///
/// # Examples
/// ```
/// # use std::sync::Arc;
/// # use confsync::{ConfigService, ServerConfig, MemoryStorage};
/// let service = ConfigService::start_with_http(
///     ServerConfig::master("http://127.0.0.1:8080"),
///     Arc::new(MemoryStorage::new()),
/// )
/// .unwrap();
/// assert_eq!(service.data_version().version, 0);
/// ```
pub struct ConfigService {
    config: ServerConfig,
    store: Arc<ConfigurationStore>,
    replicator: Arc<Replicator>,
    pool: EvaluatorPool,
    telemetry: TelemetryRecorder,
}

impl ConfigService {
    /// Load state from `storage` and start the node.
    pub fn start(
        config: ServerConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<ConfigService> {
        let store = Arc::new(ConfigurationStore::new(Snapshot::default()));
        let replicator = Replicator::bootstrap(&config, store.clone(), storage.clone(), transport)?;
        let telemetry = TelemetryRecorder::start(storage, config.telemetry_queue_capacity)?;
        let pool = EvaluatorPool::with_capacity(config.evaluator_pool_capacity);

        log::debug!(target: "confsync",
                    url:display = config.local_url,
                    role:debug = config.role;
                    "config service started");

        Ok(ConfigService {
            config,
            store,
            replicator: Arc::new(replicator),
            pool,
            telemetry,
        })
    }

    /// Start the node, talking to peers over HTTP.
    pub fn start_with_http(config: ServerConfig, storage: Arc<dyn Storage>) -> Result<ConfigService> {
        let transport = HttpTransport::new(config.peer_timeout)?;
        ConfigService::start(config, storage, Arc::new(transport))
    }

    /// Start the slave sync thread.
    ///
    /// Fails with [`Error::NotPermitted`] on the master.
    pub fn start_sync_thread(&self) -> Result<SyncThread> {
        if self.config.role != NodeRole::Slave {
            return Err(Error::NotPermitted);
        }
        Ok(SyncThread::start(
            self.replicator.clone(),
            self.config.sync_interval,
            self.config.sync_jitter,
        )?)
    }

    /// Run one sync round against the master right away.
    pub fn sync_with_master(&self) -> Result<SyncOutcome> {
        if self.config.role != NodeRole::Slave {
            return Err(Error::NotPermitted);
        }
        self.replicator.sync_once()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.get_snapshot()
    }

    pub fn data_version(&self) -> DataVersion {
        self.store.data_version()
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    pub fn evaluator_pool(&self) -> &EvaluatorPool {
        &self.pool
    }

    /// Resolve the configs of the app named by `ctx.app_key` (key or name).
    pub fn get_configs(&self, ctx: &ClientContext) -> Result<ConfigsResponse> {
        self.check_fresh()?;

        let snapshot = self.store.get_snapshot();
        let Some(app) = snapshot.find_app(&ctx.app_key) else {
            return Err(Error::NotFound {
                kind: "app",
                key: ctx.app_key.clone(),
            });
        };

        self.telemetry.record(&app.key, ctx);

        let data_sign = fingerprint(&snapshot, app, self.config.template_depth_limit);
        let nodes = snapshot.nodes().map(|node| node.url.clone()).collect();
        let configs = if !ctx.data_sign.is_empty() && ctx.data_sign == data_sign {
            None
        } else {
            Some(resolve(
                &snapshot,
                &self.pool,
                &app.key,
                ctx,
                self.config.template_depth_limit,
            ))
        };

        log::trace!(target: "confsync",
                    app_key:display = app.key,
                    unchanged = configs.is_none();
                    "resolved configs");

        Ok(ConfigsResponse {
            configs,
            data_sign,
            nodes,
        })
    }

    /// Client read endpoint: build the context from query parameters and wrap the result.
    pub fn handle_get_configs<'a, I>(&self, params: I) -> Envelope<ConfigsResponse>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let ctx = ClientContext::from_params(params);
        Envelope::from_result(self.get_configs(&ctx).inspect_err(|err| {
            log::debug!(target: "confsync", app_key:display = ctx.app_key; "config request failed: {err}");
        }))
    }

    /// Slaves refuse reads when they haven't reached the master recently.
    fn check_fresh(&self) -> Result<()> {
        if self.config.role != NodeRole::Slave {
            return Ok(());
        }
        let threshold = self.config.stale_threshold.as_secs() as i64;
        let age_secs = self
            .store
            .last_checked_at()
            .map(|at| (Utc::now() - at).num_seconds());
        match age_secs {
            Some(age) if age <= threshold => Ok(()),
            _ => {
                log::warn!(target: "confsync", age_secs:?; "refusing read on stale node");
                Err(Error::StaleData { age_secs })
            }
        }
    }

    pub fn put_user(&self, user: User) -> Result<MutationOutcome> {
        if user.name.is_empty() {
            return Err(Error::Validation("user name is empty".to_owned()));
        }
        self.replicator.mutate(Delta::upsert(Entity::User(user)), None)
    }

    pub fn delete_user(&self, name: &str) -> Result<MutationOutcome> {
        self.replicator.mutate_with(None, |snapshot| {
            require(snapshot, EntityKey::User(name.to_owned()))?;
            Ok(Delta::delete(EntityKey::User(name.to_owned())))
        })
    }

    /// Create an app or update its name and type. Sign and counters are managed by the server.
    pub fn put_app(&self, key: &str, name: &str, app_type: AppType) -> Result<MutationOutcome> {
        if key.is_empty() || name.is_empty() {
            return Err(Error::Validation("app key and name are required".to_owned()));
        }
        self.replicator.mutate_with(None, |snapshot| {
            if let Some(other) = snapshot.app_by_name(name) {
                if other.key != key {
                    return Err(Error::Validation(format!("app name `{name}` is taken")));
                }
            }
            let app = match snapshot.app(key) {
                Some(existing) => {
                    if existing.app_type == AppType::Template
                        && app_type != AppType::Template
                        && is_template_referenced(snapshot, key)
                    {
                        return Err(Error::Validation(format!(
                            "template `{key}` is still referenced"
                        )));
                    }
                    App {
                        name: name.to_owned(),
                        app_type,
                        update_times: existing.update_times + 1,
                        ..existing.clone()
                    }
                }
                None => App::new(key, name, app_type),
            };
            Ok(Delta::upsert(Entity::App(app)))
        })
    }

    /// Delete an app and its webhooks. Apps that still have configs can't be deleted.
    pub fn delete_app(&self, key: &str) -> Result<MutationOutcome> {
        self.replicator.mutate_with(None, |snapshot| {
            require(snapshot, EntityKey::App(key.to_owned()))?;
            if snapshot.app_configs(key).next().is_some() {
                return Err(Error::Validation(format!("app `{key}` still has configs")));
            }
            if is_template_referenced(snapshot, key) {
                return Err(Error::Validation(format!("template `{key}` is still referenced")));
            }
            let mut delta = Delta::delete(EntityKey::App(key.to_owned()));
            for webhook in snapshot.webhooks().filter(|w| w.app_key == key) {
                delta = delta.and_delete(EntityKey::Webhook(webhook.key.clone()));
            }
            Ok(delta)
        })
    }

    /// Create or replace a config entry.
    ///
    /// The value is decoded (and rule documents validated) before anything is written. The owning
    /// app's row is rewritten in the same mutation; its `data_sign` changes only if the entry is
    /// active before or after the change.
    pub fn put_config(&self, entry: ConfigEntry, expected: Option<i64>) -> Result<MutationOutcome> {
        if entry.key.is_empty() || entry.field_name.is_empty() {
            return Err(Error::Validation("config key and field name are required".to_owned()));
        }
        let value = ConfigValue::compile(entry.value_type, &entry.raw_value)?;

        self.replicator.mutate_with(expected, |snapshot| {
            let Some(app) = snapshot.app(&entry.app_key) else {
                return Err(Error::NotFound {
                    kind: "app",
                    key: entry.app_key.clone(),
                });
            };
            let before = snapshot.config(&entry.key).map(|config| &config.entry);
            if let Some(before) = before {
                if before.app_key != entry.app_key {
                    return Err(Error::Validation(format!(
                        "config `{}` belongs to app `{}`",
                        entry.key, before.app_key
                    )));
                }
            }
            if snapshot
                .app_configs(&entry.app_key)
                .any(|c| c.entry.key != entry.key && c.entry.field_name == entry.field_name)
            {
                return Err(Error::Validation(format!(
                    "field `{}` already exists in app `{}`",
                    entry.field_name, entry.app_key
                )));
            }
            if let ConfigValue::Template(template_key) = &value {
                match snapshot.app(template_key) {
                    Some(template)
                        if template.app_type == AppType::Template
                            && template.key != entry.app_key => {}
                    _ => {
                        return Err(Error::Validation(format!(
                            "`{template_key}` is not a template app"
                        )))
                    }
                }
            }

            let sign_changes = before.map_or(false, ConfigEntry::is_active) || entry.is_active();
            let mut app = app.clone();
            app.update_times += 1;
            if before.is_none() {
                app.key_count += 1;
            }
            if sign_changes {
                app.data_sign = fresh_token();
            }

            Ok(Delta::upsert(Entity::Config(entry.clone())).and_upsert(Entity::App(app)))
        })
    }

    pub fn delete_config(&self, key: &str, expected: Option<i64>) -> Result<MutationOutcome> {
        self.replicator.mutate_with(expected, |snapshot| {
            let Some(config) = snapshot.config(key) else {
                return Err(Error::NotFound {
                    kind: "config",
                    key: key.to_owned(),
                });
            };
            let mut delta = Delta::delete(EntityKey::Config(key.to_owned()));
            if let Some(app) = snapshot.app(&config.entry.app_key) {
                let mut app = app.clone();
                app.update_times += 1;
                app.key_count = app.key_count.saturating_sub(1);
                if config.entry.is_active() {
                    app.data_sign = fresh_token();
                }
                delta = delta.and_upsert(Entity::App(app));
            }
            Ok(delta)
        })
    }

    pub fn put_webhook(&self, webhook: Webhook) -> Result<MutationOutcome> {
        parse_url(&webhook.url)?;
        self.replicator.mutate_with(None, |snapshot| {
            require(snapshot, EntityKey::App(webhook.app_key.clone()))?;
            Ok(Delta::upsert(Entity::Webhook(webhook.clone())))
        })
    }

    pub fn delete_webhook(&self, key: &str) -> Result<MutationOutcome> {
        self.replicator.mutate_with(None, |snapshot| {
            require(snapshot, EntityKey::Webhook(key.to_owned()))?;
            Ok(Delta::delete(EntityKey::Webhook(key.to_owned())))
        })
    }

    /// Register or update a node.
    ///
    /// A second master is rejected, and so is any change to the role of this node or of the
    /// registered master. Roles only change through [`ServerConfig`] at startup.
    pub fn put_node(&self, node: Node) -> Result<MutationOutcome> {
        parse_url(&node.url)?;
        if node.url == self.config.local_url && node.role != self.config.role {
            return Err(Error::Validation(format!(
                "cannot change the role of the local node `{}`",
                node.url
            )));
        }
        self.replicator.mutate_with(None, |snapshot| {
            if let Some(master) = snapshot.master() {
                if master.url == node.url && node.role != NodeRole::Master {
                    return Err(Error::Validation(format!(
                        "cannot demote the master node `{}`",
                        node.url
                    )));
                }
                if master.url != node.url && node.role == NodeRole::Master {
                    return Err(Error::MasterConflict {
                        url: master.url.clone(),
                    });
                }
            }
            Ok(Delta::upsert(Entity::Node(node.clone())))
        })
    }

    pub fn delete_node(&self, url: &str) -> Result<MutationOutcome> {
        if url == self.config.local_url {
            return Err(Error::Validation("cannot remove the local node".to_owned()));
        }
        self.replicator.mutate_with(None, |snapshot| {
            require(snapshot, EntityKey::Node(url.to_owned()))?;
            Ok(Delta::delete(EntityKey::Node(url.to_owned())))
        })
    }

    /// Peer endpoint: apply a delta pushed by the master.
    pub fn receive_push(&self, payload: &PushPayload) -> Result<()> {
        self.replicator.apply_replicated(payload)
    }

    pub fn handle_push(&self, payload: &PushPayload) -> Envelope<()> {
        Envelope::from_result(self.receive_push(payload))
    }

    pub fn handle_version(&self) -> Envelope<DataVersion> {
        Envelope::ok(self.data_version())
    }

    pub fn dump(&self) -> Dump {
        self.store.get_snapshot().dump()
    }

    pub fn handle_dump(&self) -> Envelope<Dump> {
        Envelope::ok(self.dump())
    }

    /// Stop background work, waiting for queued telemetry to be written.
    pub fn shutdown(self) -> Result<()> {
        self.telemetry.shutdown()
    }
}

fn require(snapshot: &Snapshot, key: EntityKey) -> Result<()> {
    if snapshot.contains(&key) {
        Ok(())
    } else {
        Err(Error::NotFound {
            kind: key.kind(),
            key: key.as_str().to_owned(),
        })
    }
}

fn is_template_referenced(snapshot: &Snapshot, template_key: &str) -> bool {
    snapshot.apps().any(|app| {
        snapshot.app_configs(&app.key).any(|config| {
            matches!(&config.value, Ok(ConfigValue::Template(key)) if key == template_key)
        })
    })
}

fn parse_url(url: &str) -> Result<()> {
    reqwest::Url::parse(url).map(|_| ()).map_err(Error::InvalidUrl)
}
