//! Per-request client attributes that rules are evaluated against.
use serde::{Deserialize, Serialize};

/// Attribute symbols a rule may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Attribute {
    AppKey,
    OsType,
    OsVersion,
    AppVersion,
    Ip,
    Lang,
    DeviceId,
    Timezone,
    Network,
}

/// Kind of values an attribute holds. Operator families are only legal on matching domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Dotted numeric version, e.g. `"2.10.1"`.
    Version,
    /// Free text.
    Text,
}

impl Attribute {
    pub const ALL: [Attribute; 9] = [
        Attribute::AppKey,
        Attribute::OsType,
        Attribute::OsVersion,
        Attribute::AppVersion,
        Attribute::Ip,
        Attribute::Lang,
        Attribute::DeviceId,
        Attribute::Timezone,
        Attribute::Network,
    ];

    /// Symbol name used in rule documents.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::AppKey => "APP_KEY",
            Attribute::OsType => "OS_TYPE",
            Attribute::OsVersion => "OS_VERSION",
            Attribute::AppVersion => "APP_VERSION",
            Attribute::Ip => "IP",
            Attribute::Lang => "LANG",
            Attribute::DeviceId => "DEVICE_ID",
            Attribute::Timezone => "TIMEZONE",
            Attribute::Network => "NETWORK",
        }
    }

    pub fn from_name(name: &str) -> Option<Attribute> {
        Attribute::ALL.into_iter().find(|attr| attr.name() == name)
    }

    pub fn domain(self) -> Domain {
        match self {
            Attribute::OsVersion | Attribute::AppVersion => Domain::Version,
            _ => Domain::Text,
        }
    }
}

/// Immutable record of client attributes captured for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientContext {
    pub app_key: String,
    pub os_type: String,
    pub os_version: String,
    pub app_version: String,
    pub ip: String,
    pub lang: String,
    pub device_id: String,
    pub timezone: String,
    pub network: String,
    /// Fingerprint the client received on its previous fetch.
    pub data_sign: String,
}

impl ClientContext {
    /// Build a context from request query parameters.
    ///
    /// Short aliases (`app`, `osv`, `v`, `ida`) are remapped to their canonical attribute. When
    /// both spellings are present the canonical one wins.
    pub fn from_params<'a, I>(params: I) -> ClientContext
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ctx = ClientContext::default();
        for (name, value) in params {
            let (slot, canonical) = match name {
                "app_key" => (&mut ctx.app_key, true),
                "app" => (&mut ctx.app_key, false),
                "os_type" => (&mut ctx.os_type, true),
                "osv" => (&mut ctx.os_type, false),
                "os_version" => (&mut ctx.os_version, true),
                "app_version" => (&mut ctx.app_version, true),
                "v" => (&mut ctx.app_version, false),
                "ip" => (&mut ctx.ip, true),
                "lang" => (&mut ctx.lang, true),
                "device_id" => (&mut ctx.device_id, true),
                "ida" => (&mut ctx.device_id, false),
                "data_sign" => (&mut ctx.data_sign, true),
                "timezone" => (&mut ctx.timezone, true),
                "network" => (&mut ctx.network, true),
                _ => continue,
            };
            if canonical || slot.is_empty() {
                *slot = value.trim().to_owned();
            }
        }
        ctx
    }

    pub fn get(&self, attribute: Attribute) -> &str {
        match attribute {
            Attribute::AppKey => &self.app_key,
            Attribute::OsType => &self.os_type,
            Attribute::OsVersion => &self.os_version,
            Attribute::AppVersion => &self.app_version,
            Attribute::Ip => &self.ip,
            Attribute::Lang => &self.lang,
            Attribute::DeviceId => &self.device_id,
            Attribute::Timezone => &self.timezone,
            Attribute::Network => &self.network,
        }
    }

    /// Resolve a rule symbol. Unknown symbols and missing attributes resolve to `""`.
    pub fn lookup(&self, symbol: &str) -> &str {
        Attribute::from_name(symbol).map_or("", |attr| self.get(attr))
    }
}

#[cfg(test)]
mod tests {
    use super::{Attribute, ClientContext, Domain};

    #[test]
    fn aliases_are_remapped() {
        let ctx = ClientContext::from_params([
            ("app", "demo"),
            ("osv", "android"),
            ("v", "1.2.3"),
            ("ida", "device-1"),
            ("lang", "en"),
        ]);
        assert_eq!(ctx.app_key, "demo");
        assert_eq!(ctx.os_type, "android");
        assert_eq!(ctx.app_version, "1.2.3");
        assert_eq!(ctx.device_id, "device-1");
        assert_eq!(ctx.get(Attribute::Lang), "en");
    }

    #[test]
    fn canonical_name_wins_over_alias() {
        let ctx = ClientContext::from_params([("app_key", "real"), ("app", "alias")]);
        assert_eq!(ctx.app_key, "real");

        let ctx = ClientContext::from_params([("v", "1.0"), ("app_version", "2.0")]);
        assert_eq!(ctx.app_version, "2.0");
    }

    #[test]
    fn unknown_symbols_resolve_to_empty() {
        let ctx = ClientContext {
            lang: "fr".into(),
            ..Default::default()
        };
        assert_eq!(ctx.lookup("LANG"), "fr");
        assert_eq!(ctx.lookup("TIMEZONE"), "");
        assert_eq!(ctx.lookup("NOT_A_SYMBOL"), "");
    }

    #[test]
    fn version_domains() {
        assert_eq!(Attribute::AppVersion.domain(), Domain::Version);
        assert_eq!(Attribute::OsVersion.domain(), Domain::Version);
        assert_eq!(Attribute::Lang.domain(), Domain::Text);
        assert_eq!(Attribute::from_name("NETWORK"), Some(Attribute::Network));
    }
}
