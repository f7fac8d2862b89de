// End-to-end tests for tablebuf
// These tests drive containers, tables, views and archives through the public API

use std::sync::Arc;

use tablebuf::{
    BlobCell, CellFactory, ColumnRearranger, ColumnSchema, ContainerOptions, DataCell, DataRow,
    DataType, Error, ExecutionContext, Result, Table, TableSchema,
};
use tempfile::TempDir;

fn init() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn context(dir: &TempDir, max_rows: usize) -> ExecutionContext {
    let options = ContainerOptions::default()
        .max_rows_in_memory(max_rows)
        .temp_dir(dir.path().join("tmp"));
    ExecutionContext::new(options).unwrap()
}

fn people_schema() -> TableSchema {
    TableSchema::from_pairs(&[
        ("name", DataType::String),
        ("age", DataType::Int),
        ("score", DataType::Double),
        ("tags", DataType::Collection(Box::new(DataType::String))),
    ])
    .unwrap()
}

fn person(i: usize) -> DataRow {
    let tags = tablebuf::CollectionCell::new(
        DataType::String,
        vec![DataCell::string(format!("t{}", i % 3)), DataCell::Missing],
    );
    DataRow::new(
        format!("row{:05}", i),
        vec![
            DataCell::string(format!("name-{}", i)),
            if i % 7 == 0 { DataCell::Missing } else { DataCell::Int(i as i32) },
            DataCell::Double(i as f64 / 4.0),
            DataCell::Collection(tags),
        ],
    )
}

fn collect(table: &Table) -> Vec<DataRow> {
    table.iter().unwrap().collect::<Result<Vec<_>>>().unwrap()
}

/// Rows survive the switch from memory to the spill file unchanged
#[test]
fn test_e2e_roundtrip_with_spill() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 100);

    let mut container = ctx.create_container(people_schema()).unwrap();
    for i in 0..1_000 {
        container.add_row(person(i)).unwrap();
    }
    assert_eq!(container.size(), 1_000);
    let table = container.close().unwrap();

    let buffer = table.buffer().unwrap();
    assert!(!buffer.is_in_memory());
    assert!(buffer.spill_path().unwrap().exists());
    assert_eq!(collect(&table), (0..1_000).map(person).collect::<Vec<_>>());

    let age = table.schema().column(1).unwrap().domain();
    assert_eq!(age.lower, Some(tablebuf::DomainValue::Int(1)));
    assert_eq!(age.upper, Some(tablebuf::DomainValue::Int(999)));
}

/// A table at the threshold stays in memory; one more row spills
#[test]
fn test_e2e_threshold_transition() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 50);

    let mut at = ctx.create_container(people_schema()).unwrap();
    (0..50).for_each(|i| at.add_row(person(i)).unwrap());
    assert!(at.close().unwrap().buffer().unwrap().is_in_memory());

    let mut over = ctx.create_container(people_schema()).unwrap();
    (0..51).for_each(|i| over.add_row(person(i)).unwrap());
    let over = over.close().unwrap();
    assert!(!over.buffer().unwrap().is_in_memory());
    assert_eq!(collect(&over).len(), 51);
}

/// Repeated keys fail the container; distinct keys keep insertion order
#[test]
fn test_e2e_duplicate_keys() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 10);
    let schema = TableSchema::from_pairs(&[("v", DataType::Int)]).unwrap();

    let mut dup = ctx.create_container(schema.clone()).unwrap();
    dup.add_row(DataRow::new("r1", vec![DataCell::Int(1)])).unwrap();
    match dup.add_row(DataRow::new("r1", vec![DataCell::Int(2)])) {
        Err(Error::DuplicateKey { key, .. }) => assert_eq!(key, "r1"),
        other => panic!("expected duplicate key, got {:?}", other),
    }

    let mut ok = ctx.create_container(schema).unwrap();
    for (i, key) in ["r1", "r2", "r3"].iter().enumerate() {
        ok.add_row(DataRow::new(*key, vec![DataCell::Int(i as i32)])).unwrap();
    }
    assert_eq!(ok.size(), 3);
    let keys: Vec<String> = collect(&ok.close().unwrap()).iter().map(|r| r.key().to_string()).collect();
    assert_eq!(keys, vec!["r1", "r2", "r3"]);
}

/// Concatenation and join errors name the offending key
#[test]
fn test_e2e_view_errors() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 10);
    let schema = TableSchema::from_pairs(&[("v", DataType::Int)]).unwrap();
    let make = |keys: &[&str]| {
        let mut c = ctx.create_container(schema.clone()).unwrap();
        for key in keys {
            c.add_row(DataRow::new(*key, vec![DataCell::Int(0)])).unwrap();
        }
        c.close().unwrap()
    };

    let a = make(&["a", "b"]);
    let b = make(&["c", "a"]);
    match Table::concatenate(&[a.clone(), b]) {
        Err(Error::DuplicateKey { key, table_index }) => {
            assert_eq!(key, "a");
            assert_eq!(table_index, Some(1));
        }
        other => panic!("expected duplicate key, got {:?}", other),
    }

    let other = make(&["a", "x"]).replace_schema(TableSchema::from_pairs(&[("w", DataType::Int)]).unwrap());
    match Table::join(&a, &other.unwrap()) {
        Err(Error::KeyMismatch { position, .. }) => assert_eq!(position, 1),
        other => panic!("expected key mismatch, got {:?}", other),
    }
}

struct Initials;

impl CellFactory for Initials {
    fn column_schemas(&self) -> Vec<ColumnSchema> {
        vec![ColumnSchema::new("initial", DataType::String)]
    }

    fn cells(&self, row: &DataRow) -> Result<Vec<DataCell>> {
        match row.cell(0) {
            Some(DataCell::String(s)) => Ok(vec![DataCell::string(&s[..1])]),
            _ => Ok(vec![DataCell::Missing]),
        }
    }
}

/// Views compose and survive a save/load cycle
#[test]
fn test_e2e_view_tree_save_load() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 20);

    let mut first = ctx.create_container(people_schema()).unwrap();
    (0..30).for_each(|i| first.add_row(person(i)).unwrap());
    let mut second = ctx.create_container(people_schema()).unwrap();
    (30..45).for_each(|i| second.add_row(person(i)).unwrap());
    let all = Table::concatenate(&[first.close().unwrap(), second.close().unwrap()]).unwrap();

    let mut rearranger = ColumnRearranger::new(&all);
    rearranger.keep_only(&["score", "name"]).unwrap();
    rearranger.append(Arc::new(Initials));
    let view = rearranger.build(&ctx).unwrap();
    assert_eq!(view.schema().names(), vec!["score", "name", "initial"]);
    assert_eq!(view.row_count(), 45);

    let saved = dir.path().join("saved");
    view.save(&saved).unwrap();
    let loaded = ctx.load_table(&saved).unwrap();
    assert_eq!(collect(&loaded), collect(&view));
    assert_eq!(collect(&loaded)[44].cells()[2], DataCell::string("n"));
}

/// Blobs of a published table are referenced, copied into exports, and
/// stay readable after the source is cleared
#[test]
fn test_e2e_blob_sharing_and_export() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 2);
    let schema = TableSchema::from_pairs(&[("img", DataType::Blob("png".into()))]).unwrap();

    let mut source = ctx.create_container(schema.clone()).unwrap();
    for i in 0..5u8 {
        let cell = BlobCell::new("png", vec![i; 4096]);
        source.add_row(DataRow::new(format!("img{}", i), vec![DataCell::Blob(cell)])).unwrap();
    }
    let source = source.close().unwrap();
    assert_eq!(source.buffer().unwrap().blob_store().files_written(), 5);
    ctx.publish(&source);

    let mut copy = ctx.create_container(schema).unwrap();
    for row in source.iter().unwrap() {
        copy.add_row(row.unwrap()).unwrap();
    }
    let copy = copy.close().unwrap();
    assert_eq!(copy.buffer().unwrap().blob_store().files_written(), 0);

    let exported = dir.path().join("copy.zip");
    ctx.export_table(&copy, &exported).unwrap();
    ctx.clear_table(&source);
    source.clear();

    let imported = ctx.import_table(&exported).unwrap();
    assert!(imported.buffer().unwrap().is_deferred());
    for (i, row) in collect(&imported).iter().enumerate() {
        match row.cell(0) {
            Some(DataCell::Blob(blob)) => {
                assert_eq!(blob.address().unwrap().buffer_id, imported.id());
                assert_eq!(&*blob.payload().unwrap(), &vec![i as u8; 4096][..]);
            }
            other => panic!("expected blob, got {:?}", other),
        }
    }
    assert!(!imported.buffer().unwrap().is_deferred());
}

/// Clearing a table invalidates open cursors and removes its files
#[test]
fn test_e2e_clear_releases_files() {
    init();
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 5);
    let mut container = ctx.create_container(people_schema()).unwrap();
    (0..20).for_each(|i| container.add_row(person(i)).unwrap());
    let table = container.close().unwrap();
    let spill = table.buffer().unwrap().spill_path().unwrap();

    let mut cursor = table.iter().unwrap();
    assert!(cursor.next().unwrap().is_ok());
    ctx.clear_table(&table);
    assert!(!spill.exists());
    assert!(cursor.next().is_none());
    assert!(table.iter().is_err());
}
