// Process shutdown cleanup
// Kept in its own test binary: shutdown_cleanup affects every live buffer

use tablebuf::{shutdown_cleanup, ContainerOptions, DataCell, DataRow, DataType, ExecutionContext, TableSchema};
use tempfile::TempDir;

#[test]
fn test_shutdown_cleanup_deletes_live_buffers() {
    let dir = TempDir::new().unwrap();
    let options = ContainerOptions::default()
        .max_rows_in_memory(1)
        .synchronous_write(true)
        .temp_dir(dir.path());
    let ctx = ExecutionContext::new(options).unwrap();
    let schema = TableSchema::from_pairs(&[("n", DataType::Int)]).unwrap();

    let mut tables = Vec::new();
    for t in 0..3 {
        let mut container = ctx.create_container(schema.clone()).unwrap();
        for i in 0..5 {
            container.add_row(DataRow::new(format!("{}-{}", t, i), vec![DataCell::Int(i)])).unwrap();
        }
        tables.push(container.close().unwrap());
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

    assert_eq!(shutdown_cleanup(), 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    for table in &tables {
        assert!(table.iter().is_err());
    }
    assert_eq!(shutdown_cleanup(), 0);
}
