//! Benchmarks for the registry hot paths.
//!
//! Resolution and scenario compilation run on every menu selection, and
//! validation runs before every execution, so all three are measured on a
//! registry sized like a real machine config.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use vmc_engine::{Doer, Engine, FuncArg, Nothing};

/// Registry with 200 plain actions and 50 parameterised ones.
fn populated_engine() -> Engine {
    let e = Engine::new();
    for i in 0..200 {
        let name = format!("mdb.device{}.poll", i);
        e.register(name.as_str(), Arc::new(Nothing::new(name.as_str())));
    }
    for i in 0..50 {
        let tag = format!("motor{}.move", i);
        e.register(
            format!("{}(?)", tag),
            Arc::new(FuncArg::sync(tag, |_, _| Ok(()))),
        );
    }
    e
}

fn menu_scenario() -> String {
    (0..20)
        .map(|i| {
            if i % 2 == 0 {
                format!("mdb.device{}.poll", i)
            } else {
                format!("motor{}.move({})", i, i * 10)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_resolve(c: &mut Criterion) {
    let e = populated_engine();

    let mut group = c.benchmark_group("resolve");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("plain", |b| {
        b.iter(|| e.try_resolve("mdb.device150.poll"));
    });

    group.bench_function("parameterised", |b| {
        b.iter(|| e.try_resolve("motor25.move(250)"));
    });

    group.bench_function("not_resolved", |b| {
        b.iter(|| e.try_resolve("coffee.grind(3)"));
    });

    group.finish();
}

fn bench_parse_text(c: &mut Criterion) {
    let e = populated_engine();
    let scenario = menu_scenario();

    let mut group = c.benchmark_group("parse_text");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("menu_20_words", |b| {
        b.iter(|| e.parse_text("menu.1", &scenario));
    });

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let e = populated_engine();
    let scenario = menu_scenario();

    let mut group = c.benchmark_group("validate");
    group.measurement_time(Duration::from_secs(5));

    // Lazy words resolve on the first call and are cached afterwards.
    let d = e.parse_text("menu.1", &scenario).unwrap();
    group.bench_function("cached_scenario", |b| {
        b.iter(|| d.validate());
    });

    group.bench_function("fresh_scenario", |b| {
        b.iter(|| {
            let d = e.parse_text("menu.1", &scenario).unwrap();
            d.validate()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_parse_text, bench_validate);
criterion_main!(benches);
