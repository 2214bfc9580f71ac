use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use geoquery_core::data::DatasetMetadata;
use geoquery_core::{CountryDataset, CountryRecord, Executor, QueryValidator, SchemaCatalog};

const REGIONS: [&str; 5] = ["Africa", "Americas", "Asia", "Europe", "Oceania"];

fn synthetic_dataset(num_records: usize) -> CountryDataset {
    let records = (0..num_records)
        .map(|i| {
            let mut record = CountryRecord::new(format!("C{:05}", i), format!("Country{}", i));
            record.population = Some(((i * 7919) % 200_000_000) as i64);
            record.area = Some(1000.0 + (i as f64 * 13.5));
            record.region = Some(REGIONS[i % REGIONS.len()].to_string());
            record.languages = Some(if i % 3 == 0 { "English, French" } else { "Spanish" }.to_string());
            record
        })
        .collect();
    CountryDataset::from_records(DatasetMetadata::default(), records)
}

fn executor_select_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_select");
    group.measurement_time(Duration::from_secs(10));

    let validator = QueryValidator::new(SchemaCatalog::standard());
    let query = validator
        .validate("SELECT name, ISO_A3 FROM countries WHERE region = 'Europe'")
        .unwrap();

    for num_records in [250, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*num_records as u64));
        let executor = Executor::new(&synthetic_dataset(*num_records));

        group.bench_with_input(
            BenchmarkId::new("region_filter", num_records),
            &query,
            |b, query| {
                b.iter(|| {
                    black_box(executor.execute(query).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn executor_query_shapes_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_query_shapes");

    let validator = QueryValidator::new(SchemaCatalog::standard());
    let executor = Executor::new(&synthetic_dataset(1000));

    let queries = vec![
        ("select_all", "SELECT * FROM countries"),
        ("like_filter", "SELECT name FROM countries WHERE languages LIKE '%french%'"),
        ("order_limit", "SELECT name, population FROM countries ORDER BY population DESC LIMIT 10"),
        ("distinct", "SELECT DISTINCT region FROM countries"),
        (
            "multiple_conditions",
            "SELECT name FROM countries WHERE population > 1000000 AND area < 5000 OR region = 'Asia'",
        ),
    ];

    for (query_name, sql) in queries {
        let query = validator.validate(sql).unwrap();
        group.bench_function(query_name, |b| {
            b.iter(|| {
                black_box(executor.execute(&query).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, executor_select_benchmark, executor_query_shapes_benchmark);
criterion_main!(benches);
