//! Entities held by the configuration store and their mutation types.
use std::sync::Arc;

use chrono::Utc;
use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    rules::{validate_rule, CondValues},
    Error, Result,
};

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh random sign (32 hex characters).
pub fn fresh_token() -> String {
    let mut seed = [0u8; 24];
    thread_rng().fill_bytes(&mut seed[..16]);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    seed[16..].copy_from_slice(&nanos.to_le_bytes());
    format!("{:x}", md5::compute(seed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Float,
    /// Value is a rule document.
    Code,
    /// Value is the key of a template app, resolved recursively.
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Real,
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Admin,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub password_sign: String,
    pub level: UserLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub app_type: AppType,
    /// Change-detection fingerprint, regenerated whenever an active config of the app changes.
    pub data_sign: String,
    pub key_count: u32,
    pub update_times: u64,
}

impl App {
    pub fn new(key: impl Into<String>, name: impl Into<String>, app_type: AppType) -> App {
        App {
            key: key.into(),
            name: name.into(),
            app_type,
            data_sign: fresh_token(),
            key_count: 0,
            update_times: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub app_key: String,
    pub field_name: String,
    pub raw_value: String,
    pub value_type: ValueType,
    pub status: Status,
}

impl ConfigEntry {
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub key: String,
    pub app_key: String,
    pub url: String,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub url: String,
    #[serde(rename = "type")]
    pub role: NodeRole,
    #[serde(default)]
    pub last_check_utc: Option<Timestamp>,
    #[serde(default)]
    pub data_version: i64,
}

/// Process-wide replication cursor.
///
/// Each mutation produces a new version whose `old_sign` is the previous `sign`, so a receiver can
/// tell whether a delta extends the chain it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVersion {
    pub version: i64,
    pub sign: String,
    pub old_sign: String,
    pub updated_at: Timestamp,
}

impl DataVersion {
    /// Version 0 with a fresh sign.
    pub fn initial() -> DataVersion {
        DataVersion {
            version: 0,
            sign: fresh_token(),
            old_sign: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn next(&self) -> DataVersion {
        DataVersion {
            version: self.version + 1,
            sign: fresh_token(),
            old_sign: self.sign.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Whether `next` directly follows `self` in the chain.
    pub fn is_followed_by(&self, next: &DataVersion) -> bool {
        next.version == self.version + 1 && next.old_sign == self.sign
    }
}

impl Default for DataVersion {
    fn default() -> DataVersion {
        DataVersion {
            version: 0,
            sign: String::new(),
            old_sign: String::new(),
            updated_at: Timestamp::UNIX_EPOCH,
        }
    }
}

/// A client attribute value observed for an app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientAttribute {
    pub app_key: String,
    pub attribute: String,
    pub value: String,
}

/// A replicated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum Entity {
    User(User),
    App(App),
    Config(ConfigEntry),
    Webhook(Webhook),
    Node(Node),
}

/// Unique key of an [`Entity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum EntityKey {
    User(String),
    App(String),
    Config(String),
    Webhook(String),
    Node(String),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::User(user) => EntityKey::User(user.name.clone()),
            Entity::App(app) => EntityKey::App(app.key.clone()),
            Entity::Config(config) => EntityKey::Config(config.key.clone()),
            Entity::Webhook(webhook) => EntityKey::Webhook(webhook.key.clone()),
            Entity::Node(node) => EntityKey::Node(node.url.clone()),
        }
    }
}

impl EntityKey {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityKey::User(_) => "user",
            EntityKey::App(_) => "app",
            EntityKey::Config(_) => "config",
            EntityKey::Webhook(_) => "webhook",
            EntityKey::Node(_) => "node",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityKey::User(key)
            | EntityKey::App(key)
            | EntityKey::Config(key)
            | EntityKey::Webhook(key)
            | EntityKey::Node(key) => key,
        }
    }
}

/// One change within a [`Delta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Change {
    Upsert { entity: Entity },
    Delete { key: EntityKey },
}

/// The set of changes one mutation applies. Committed atomically with a new [`DataVersion`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub changes: Vec<Change>,
}

impl Delta {
    pub fn upsert(entity: Entity) -> Delta {
        Delta::default().and_upsert(entity)
    }

    pub fn delete(key: EntityKey) -> Delta {
        Delta::default().and_delete(key)
    }

    pub fn and_upsert(mut self, entity: Entity) -> Delta {
        self.changes.push(Change::Upsert { entity });
        self
    }

    pub fn and_delete(mut self, key: EntityKey) -> Delta {
        self.changes.push(Change::Delete { key });
        self
    }
}

/// Config value decoded at store-update time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Code(Arc<CondValues>),
    /// Key of the template app to inline.
    Template(String),
}

impl ConfigValue {
    /// Decode `raw` under `value_type`. Rule documents are validated as well.
    pub fn compile(value_type: ValueType, raw: &str) -> Result<ConfigValue> {
        Ok(match value_type {
            ValueType::String => ConfigValue::String(raw.to_owned()),
            ValueType::Int => ConfigValue::Int(
                raw.trim()
                    .parse()
                    .map_err(|_| Error::Validation(format!("`{raw}` is not an integer")))?,
            ),
            ValueType::Float => ConfigValue::Float(
                raw.trim()
                    .parse()
                    .map_err(|_| Error::Validation(format!("`{raw}` is not a number")))?,
            ),
            ValueType::Code => ConfigValue::Code(Arc::new(validate_rule(raw)?)),
            ValueType::Template => {
                let key = raw.trim();
                if key.is_empty() {
                    return Err(Error::Validation("template key is empty".to_owned()));
                }
                ConfigValue::Template(key.to_owned())
            }
        })
    }
}

/// A config entry together with its decoded value.
///
/// Entries loaded from storage or replicated from the master are kept even if they fail to
/// compile; the failure is stored so that one bad entry doesn't hide the rest of the app.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub entry: ConfigEntry,
    pub value: std::result::Result<ConfigValue, Error>,
}

impl CompiledConfig {
    pub fn compile(entry: ConfigEntry) -> CompiledConfig {
        let value = ConfigValue::compile(entry.value_type, &entry.raw_value);
        if let Err(err) = &value {
            log::warn!(target: "confsync",
                       config_key:display = entry.key,
                       app_key:display = entry.app_key;
                       "stored config does not compile: {err}");
        }
        CompiledConfig { entry, value }
    }
}

#[cfg(test)]
mod tests {
    use super::{fresh_token, ConfigValue, DataVersion, Delta, Entity, EntityKey, Node, NodeRole, ValueType};
    use crate::Error;

    #[test]
    fn tokens_are_fresh() {
        let a = fresh_token();
        let b = fresh_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn version_chain() {
        let v0 = DataVersion::initial();
        let v1 = v0.next();
        let v2 = v1.next();
        assert_eq!(v2.version, 2);
        assert_eq!(v1.old_sign, v0.sign);
        assert_eq!(v2.old_sign, v1.sign);
        assert!(v0.is_followed_by(&v1));
        assert!(!v0.is_followed_by(&v2));
    }

    #[test]
    fn compile_values() {
        assert_eq!(
            ConfigValue::compile(ValueType::Int, " 42 ").unwrap(),
            ConfigValue::Int(42)
        );
        assert_eq!(
            ConfigValue::compile(ValueType::Float, "0.5").unwrap(),
            ConfigValue::Float(0.5)
        );
        assert!(matches!(
            ConfigValue::compile(ValueType::Int, "4.5"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ConfigValue::compile(ValueType::Code, "{"),
            Err(Error::Decode(_))
        ));
        assert!(ConfigValue::compile(ValueType::Template, "  ").is_err());
    }

    #[test]
    fn delta_wire_format() {
        let delta = Delta::upsert(Entity::Node(Node {
            url: "http://10.0.0.2:8080".into(),
            role: NodeRole::Slave,
            last_check_utc: None,
            data_version: 3,
        }))
        .and_delete(EntityKey::Config("c1".into()));

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["changes"][0]["op"], "upsert");
        assert_eq!(json["changes"][0]["entity"]["kind"], "node");
        assert_eq!(json["changes"][0]["entity"]["record"]["type"], "slave");
        assert_eq!(json["changes"][1]["key"]["key"], "c1");

        let back: Delta = serde_json::from_value(json).unwrap();
        assert_eq!(back, delta);
    }
}
