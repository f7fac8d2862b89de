// Read performance benchmarks for tablebuf

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tablebuf::{ContainerOptions, DataCell, DataRow, DataType, ExecutionContext, Table, TableSchema};
use tempfile::TempDir;

fn populate(ctx: &ExecutionContext, size: usize) -> Table {
    let schema = TableSchema::from_pairs(&[("id", DataType::Long), ("name", DataType::String)]).unwrap();
    let mut container = ctx.create_container(schema).unwrap();
    for i in 0..size {
        container
            .add_row(DataRow::new(
                format!("row{:08}", i),
                vec![DataCell::Long(i as i64), DataCell::string(format!("value{:08}", i))],
            ))
            .unwrap();
    }
    container.close().unwrap()
}

fn scan(table: &Table) {
    for row in table.iter().unwrap() {
        black_box(row.unwrap());
    }
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for size in [1000, 10000, 50000].iter() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ExecutionContext::new(ContainerOptions::default().temp_dir(temp_dir.path())).unwrap();
        let table = populate(&ctx, *size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &table, |b, table| {
            b.iter(|| scan(table));
        });
    }

    group.finish();
}

fn benchmark_prefetched_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefetched_scan");
    let temp_dir = TempDir::new().unwrap();
    let ctx = ExecutionContext::new(ContainerOptions::default().temp_dir(temp_dir.path())).unwrap();
    let table = populate(&ctx, 50_000);

    group.throughput(Throughput::Elements(50_000));
    group.bench_function("direct", |b| b.iter(|| scan(&table)));
    group.bench_function("prefetched", |b| {
        b.iter(|| {
            for row in table.iter_prefetched(ctx.options()).unwrap() {
                black_box(row.unwrap());
            }
        })
    });

    group.finish();
}

fn benchmark_import_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("import_scan");
    let temp_dir = TempDir::new().unwrap();
    let ctx = ExecutionContext::new(ContainerOptions::default().temp_dir(temp_dir.path())).unwrap();
    let path = temp_dir.path().join("table.zip");
    ctx.export_table(&populate(&ctx, 20_000), &path).unwrap();

    group.throughput(Throughput::Elements(20_000));
    group.bench_function("zip_20000", |b| {
        b.iter(|| {
            let table = ctx.import_table(&path).unwrap();
            scan(&table);
            ctx.clear_table(&table);
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_scan, benchmark_prefetched_scan, benchmark_import_scan);
criterion_main!(benches);
