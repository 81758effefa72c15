//! # Routing Benchmarks
//!
//! | Operation | Target |
//! |-----------|--------|
//! | Resolve an export topic with 1000 subscribers | < 1ms |
//! | Build the export contexts of an instance | < 10µs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;

use shared_bus::{Destination, MessagingContext, MessagingError, RoutingRegistry, ThoseThat};
use shared_types::{Component, Envelope, Instance, InstancePath};

#[derive(Clone)]
struct NullDestination;

impl Destination for NullDestination {
    fn deliver(&self, _envelope: Envelope) -> Result<(), MessagingError> {
        Ok(())
    }
}

fn mysql() -> Instance {
    let component = Component::new("MySQL", "logger")
        .exports("MySQL.ip", Some("10.0.0.3"))
        .exports("MySQL.port", Some("3306"))
        .exports("MySQL.user", Some("root"));
    Instance::new(InstancePath::parse("/db/mysql").unwrap(), component)
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing-resolve");
    let instance = mysql();
    let ctx = MessagingContext::for_exported_variables("bench", "lamp", &instance, &BTreeMap::new(), ThoseThat::Import)
        .remove(0);

    for subscribers in [10, 100, 1000] {
        let registry = RoutingRegistry::<NullDestination>::new();
        for i in 0..subscribers {
            let owner = format!("agent@bench/lamp/web-{i}");
            registry.register_destination(&owner, NullDestination);
            registry.subscribe(&owner, &ctx);
        }

        group.throughput(Throughput::Elements(subscribers));
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &registry, |b, registry| {
            b.iter(|| black_box(registry.resolve("agent@bench/lamp/db", &ctx).len()))
        });
    }
    group.finish();
}

fn bench_contexts(c: &mut Criterion) {
    let instance = mysql();
    let mut aliases = BTreeMap::new();
    aliases.insert("MySQL.ip".to_string(), "Lamp.db_ip".to_string());

    c.bench_function("exported-contexts", |b| {
        b.iter(|| {
            black_box(MessagingContext::for_exported_variables(
                "bench",
                "lamp",
                &instance,
                &aliases,
                ThoseThat::Import,
            ))
        })
    });
}

criterion_group!(benches, bench_resolve, bench_contexts);
criterion_main!(benches);
