//! Resolve an app's active configs for a client.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    configuration_store::Snapshot,
    context::ClientContext,
    models::{App, ConfigValue},
    pool::EvaluatorPool,
    rules::{Evaluator, Scalar},
};

/// Resolved value of one config field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Scalar(Scalar),
    /// Configs of a template app, inlined.
    Nested(ResolvedConfigs),
}

/// Field name to resolved value.
pub type ResolvedConfigs = BTreeMap<String, ResolvedValue>;

/// Resolve all active configs of `app_key` against `ctx`.
///
/// Template configs are resolved recursively up to `depth_limit` levels; a template reached past
/// the limit (e.g. because templates form a cycle) is left out of the result. Returns an empty map
/// if the app doesn't exist.
pub fn resolve(
    snapshot: &Snapshot,
    pool: &EvaluatorPool,
    app_key: &str,
    ctx: &ClientContext,
    depth_limit: usize,
) -> ResolvedConfigs {
    let mut evaluator = pool.get();
    resolve_app(snapshot, &mut evaluator, app_key, ctx, 0, depth_limit)
}

fn resolve_app(
    snapshot: &Snapshot,
    evaluator: &mut Evaluator,
    app_key: &str,
    ctx: &ClientContext,
    depth: usize,
    depth_limit: usize,
) -> ResolvedConfigs {
    let mut result = ResolvedConfigs::new();
    for config in snapshot.app_configs(app_key) {
        if !config.entry.is_active() {
            continue;
        }
        let Ok(value) = &config.value else {
            log::debug!(target: "confsync", config_key:display = config.entry.key; "skipping config that failed to compile");
            continue;
        };

        let resolved = match value {
            ConfigValue::String(s) => ResolvedValue::Scalar(Scalar::String(s.clone())),
            ConfigValue::Int(i) => ResolvedValue::Scalar(Scalar::Int(*i)),
            ConfigValue::Float(f) => ResolvedValue::Scalar(Scalar::Float(*f)),
            ConfigValue::Code(rule) => {
                ResolvedValue::Scalar(evaluator.eval_cond_values(rule, ctx).clone())
            }
            ConfigValue::Template(template_key) => {
                if depth + 1 > depth_limit {
                    log::warn!(target: "confsync",
                               app_key,
                               template_key:display = template_key,
                               depth_limit;
                               "template nesting too deep, omitting");
                    continue;
                }
                let Some(template) = snapshot.find_app(template_key) else {
                    log::warn!(target: "confsync", app_key, template_key:display = template_key; "template app not found");
                    continue;
                };
                ResolvedValue::Nested(resolve_app(
                    snapshot,
                    evaluator,
                    &template.key,
                    ctx,
                    depth + 1,
                    depth_limit,
                ))
            }
        };
        result.insert(config.entry.field_name.clone(), resolved);
    }
    result
}

/// Change-detection sign handed to clients for `app`.
///
/// This is the app's own `data_sign` unless the app references templates, in which case it is a
/// digest over the app's sign and the signs of every template it reaches, so that editing a
/// template also invalidates clients of apps using it.
pub fn fingerprint(snapshot: &Snapshot, app: &App, depth_limit: usize) -> String {
    let mut signs = Vec::new();
    collect_template_signs(snapshot, &app.key, 0, depth_limit, &mut signs);
    if signs.is_empty() {
        return app.data_sign.clone();
    }

    let mut input = app.data_sign.clone();
    for sign in signs {
        input.push(':');
        input.push_str(sign);
    }
    format!("{:x}", md5::compute(input))
}

fn collect_template_signs<'a>(
    snapshot: &'a Snapshot,
    app_key: &str,
    depth: usize,
    depth_limit: usize,
    signs: &mut Vec<&'a str>,
) {
    if depth >= depth_limit {
        return;
    }
    for config in snapshot.app_configs(app_key) {
        if !config.entry.is_active() {
            continue;
        }
        if let Ok(ConfigValue::Template(template_key)) = &config.value {
            if let Some(template) = snapshot.find_app(template_key) {
                signs.push(&template.data_sign);
                collect_template_signs(snapshot, &template.key, depth + 1, depth_limit, signs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fingerprint, resolve, ResolvedValue};
    use crate::{
        configuration_store::Snapshot,
        context::ClientContext,
        models::{App, AppType, Change, ConfigEntry, Entity, Status, ValueType},
        pool::EvaluatorPool,
        rules::Scalar,
    };

    fn add(snapshot: &mut Snapshot, entity: Entity) {
        snapshot.apply(&Change::Upsert { entity });
    }

    fn config(key: &str, app_key: &str, value_type: ValueType, raw: &str) -> Entity {
        Entity::Config(ConfigEntry {
            key: key.into(),
            app_key: app_key.into(),
            field_name: key.into(),
            raw_value: raw.into(),
            value_type,
            status: Status::Active,
        })
    }

    fn fixture() -> Snapshot {
        let mut snapshot = Snapshot::default();
        add(&mut snapshot, Entity::App(App::new("app", "App", AppType::Real)));
        add(&mut snapshot, Entity::App(App::new("tpl", "Template", AppType::Template)));
        add(&mut snapshot, config("title", "app", ValueType::String, "hello"));
        add(&mut snapshot, config("limit", "app", ValueType::Int, "10"));
        add(&mut snapshot, config("ratio", "app", ValueType::Float, "0.25"));
        add(
            &mut snapshot,
            config(
                "price",
                "app",
                ValueType::Code,
                r#"{"cond-values":[{"condition":{"func":"str=","arguments":[{"symbol":"LANG"},"en"]},"value":999}],"default-value":100000}"#,
            ),
        );
        add(&mut snapshot, config("shared", "app", ValueType::Template, "tpl"));
        add(&mut snapshot, config("color", "tpl", ValueType::String, "blue"));
        snapshot
    }

    #[test]
    fn resolves_all_value_types() {
        let snapshot = fixture();
        let pool = EvaluatorPool::with_capacity(1);
        let ctx = ClientContext {
            lang: "en".into(),
            ..Default::default()
        };

        let result = resolve(&snapshot, &pool, "app", &ctx, 8);
        assert_eq!(result["title"], ResolvedValue::Scalar("hello".into()));
        assert_eq!(result["limit"], ResolvedValue::Scalar(Scalar::Int(10)));
        assert_eq!(result["ratio"], ResolvedValue::Scalar(Scalar::Float(0.25)));
        assert_eq!(result["price"], ResolvedValue::Scalar(Scalar::Int(999)));
        let ResolvedValue::Nested(shared) = &result["shared"] else {
            panic!("expected nested template result");
        };
        assert_eq!(shared["color"], ResolvedValue::Scalar("blue".into()));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["shared"]["color"], "blue");
        assert_eq!(json["price"], 999);
    }

    #[test]
    fn skips_inactive_and_broken_configs() {
        let mut snapshot = fixture();
        let Entity::Config(mut inactive) = config("off", "app", ValueType::String, "x") else {
            unreachable!()
        };
        inactive.status = Status::Inactive;
        add(&mut snapshot, Entity::Config(inactive));
        add(&mut snapshot, config("broken", "app", ValueType::Int, "not a number"));

        let pool = EvaluatorPool::with_capacity(1);
        let result = resolve(&snapshot, &pool, "app", &ClientContext::default(), 8);
        assert!(!result.contains_key("off"));
        assert!(!result.contains_key("broken"));
        assert_eq!(result["price"], ResolvedValue::Scalar(Scalar::Int(100000)));
    }

    #[test]
    fn template_cycle_is_cut_off() {
        let mut snapshot = Snapshot::default();
        add(&mut snapshot, Entity::App(App::new("a", "A", AppType::Template)));
        add(&mut snapshot, Entity::App(App::new("b", "B", AppType::Template)));
        add(&mut snapshot, config("to_b", "a", ValueType::Template, "b"));
        add(&mut snapshot, config("to_a", "b", ValueType::Template, "a"));

        let pool = EvaluatorPool::with_capacity(1);
        let result = resolve(&snapshot, &pool, "a", &ClientContext::default(), 3);

        // a -> b -> a -> b, then the next level is omitted.
        let mut level = &result;
        for key in ["to_b", "to_a", "to_b"] {
            let Some(ResolvedValue::Nested(next)) = level.get(key) else {
                panic!("missing nested {key}");
            };
            level = next;
        }
        assert!(level.is_empty());
    }

    #[test]
    fn unknown_app_resolves_to_nothing() {
        let pool = EvaluatorPool::with_capacity(1);
        let result = resolve(&fixture(), &pool, "nope", &ClientContext::default(), 8);
        assert!(result.is_empty());
    }

    #[test]
    fn fingerprint_covers_templates() {
        let mut snapshot = fixture();
        let plain = App::new("plain", "Plain", AppType::Real);
        add(&mut snapshot, Entity::App(plain.clone()));
        assert_eq!(fingerprint(&snapshot, &plain, 8), plain.data_sign);

        let app = snapshot.app("app").unwrap().clone();
        let before = fingerprint(&snapshot, &app, 8);
        assert_ne!(before, app.data_sign);
        assert_eq!(before, fingerprint(&snapshot, &app, 8));

        add(&mut snapshot, Entity::App(App::new("tpl", "Template", AppType::Template)));
        assert_ne!(fingerprint(&snapshot, &app, 8), before);
    }
}
