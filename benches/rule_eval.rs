use std::{fs, sync::Arc};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use confsync::{
    matcher::resolve,
    models::{App, AppType, ConfigEntry, ConfigValue, Delta, Entity, Status, ValueType},
    pool::EvaluatorPool,
    rules::{validate_rule, Evaluator},
    ClientContext, ConfigurationStore, DataVersion, Snapshot,
};

fn rule(name: &str) -> String {
    let file: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(format!("tests/data/rules/{name}.json")).unwrap())
            .unwrap();
    file["rule"].to_string()
}

fn criterion_benchmark(c: &mut Criterion) {
    let ctx = ClientContext::from_params([
        ("app", "shop"),
        ("os_type", "android"),
        ("app_version", "2.3.1"),
        ("lang", "en"),
        ("timezone", "Asia/Shanghai,beijing"),
    ]);

    {
        let mut group = c.benchmark_group("eval_cond_values");
        group.throughput(Throughput::Elements(1));
        for name in ["lang-price", "app-version-gate", "timezone-wildcard"] {
            let rule = validate_rule(&rule(name)).unwrap();
            let mut evaluator = Evaluator::new();
            group.bench_function(name, |b| {
                b.iter(|| {
                    evaluator
                        .eval_cond_values(black_box(&rule), black_box(&ctx))
                        .clone()
                })
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("validate_rule");
        group.throughput(Throughput::Elements(1));
        let json = rule("app-version-gate");
        group.bench_function("app-version-gate", |b| {
            b.iter(|| validate_rule(black_box(&json)))
        });
        group.bench_function("compile", |b| {
            b.iter(|| ConfigValue::compile(ValueType::Code, black_box(&json)))
        });
        group.finish();
    }

    {
        let store = ConfigurationStore::new(Snapshot::default());
        let mut delta = Delta::upsert(Entity::App(App::new("shop", "Shop", AppType::Real)));
        for (i, name) in ["lang-price", "app-version-gate", "timezone-wildcard"]
            .into_iter()
            .enumerate()
        {
            for copy in 0..10 {
                delta = delta.and_upsert(Entity::Config(ConfigEntry {
                    key: format!("{name}-{copy}"),
                    app_key: "shop".to_owned(),
                    field_name: format!("field_{i}_{copy}"),
                    raw_value: rule(name),
                    value_type: ValueType::Code,
                    status: Status::Active,
                }));
            }
        }
        store.apply(&delta, DataVersion::initial().next());
        let snapshot: Arc<Snapshot> = store.get_snapshot();
        let pool = EvaluatorPool::with_capacity(4);

        let mut group = c.benchmark_group("resolve");
        group.throughput(Throughput::Elements(30));
        group.bench_function("30-rules", |b| {
            b.iter(|| resolve(black_box(&snapshot), &pool, black_box("shop"), black_box(&ctx), 8))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("store_apply");
        for size in [100, 10_000] {
            let store = ConfigurationStore::new(Snapshot::default());
            let mut seed = Delta::upsert(Entity::App(App::new("shop", "Shop", AppType::Real)));
            for i in 0..size {
                seed = seed.and_upsert(Entity::Config(ConfigEntry {
                    key: format!("c{i}"),
                    app_key: "shop".to_owned(),
                    field_name: format!("field_{i}"),
                    raw_value: i.to_string(),
                    value_type: ValueType::Int,
                    status: Status::Active,
                }));
            }
            let version = DataVersion::initial().next();
            store.apply(&seed, version.clone());

            let change = Delta::upsert(Entity::Config(ConfigEntry {
                key: "c0".to_owned(),
                app_key: "shop".to_owned(),
                field_name: "field_0".to_owned(),
                raw_value: "-1".to_owned(),
                value_type: ValueType::Int,
                status: Status::Active,
            }));
            // A reader keeps the previous snapshot alive, as request handlers do.
            let _held = store.get_snapshot();
            group.bench_function(format!("one-config/{size}"), |b| {
                b.iter(|| store.apply(black_box(&change), version.clone()))
            });
        }
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
