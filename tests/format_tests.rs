// Archive format compatibility tests
// Older container versions must be written and read back faithfully

use std::fs::File;
use std::sync::Arc;

use tablebuf::{
    BlobCell, Buffer, BufferWriter, CellTypeRegistry, ContainerOptions, DataCell, DataRow, DataType,
    FormatVersion, Result, TableSchema,
};
use tempfile::TempDir;

fn options(dir: &TempDir) -> ContainerOptions {
    ContainerOptions::default().max_rows_in_memory(8).temp_dir(dir.path())
}

fn schema() -> TableSchema {
    TableSchema::from_pairs(&[("n", DataType::Long), ("s", DataType::String)]).unwrap()
}

fn row(i: i64) -> DataRow {
    DataRow::new(format!("k{}", i), vec![DataCell::Long(i * 1_000_000_007), DataCell::string(format!("s{}", i))])
}

fn buffer(dir: &TempDir, rows: i64) -> Arc<Buffer> {
    let mut writer = BufferWriter::new(&options(dir), Arc::new(CellTypeRegistry::new()), true);
    for i in 0..rows {
        writer.add_row(row(i)).unwrap();
    }
    writer.close(schema()).unwrap()
}

fn rows(buffer: &Buffer) -> Vec<DataRow> {
    buffer.iter().unwrap().collect::<Result<Vec<_>>>().unwrap()
}

fn entry_names(path: &std::path::Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

#[test]
fn test_every_keyed_version_roundtrips() {
    let dir = TempDir::new().unwrap();
    let source = buffer(&dir, 20);
    for number in 1..=5 {
        let version = FormatVersion::keyed(number).unwrap();
        let path = dir.path().join(format!("v{}.zip", number));
        source.save_as(&path, version, &mut |_| Ok(())).unwrap();

        let loaded = Buffer::load(&path, Arc::new(CellTypeRegistry::new()), dir.path()).unwrap();
        assert_eq!(loaded.version(), version);
        assert_eq!(loaded.row_count(), 20);
        assert_eq!(loaded.schema().names(), vec!["n", "s"]);
        assert_eq!(rows(&loaded), rows(&source), "version {}", number);
    }
}

#[test]
fn test_archive_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.zip");
    buffer(&dir, 3).save(&path).unwrap();
    let mut names = entry_names(&path);
    names.sort();
    assert_eq!(names, vec!["data.bin", "meta.xml"]);

    let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let mut meta = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("meta.xml").unwrap(), &mut meta).unwrap();
    assert!(meta.contains("container_1.4.0"));
}

#[test]
fn test_old_version_reexported_in_current_format() {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old.zip");
    buffer(&dir, 12).save_as(&old, FormatVersion::keyed(2).unwrap(), &mut |_| Ok(())).unwrap();

    let loaded = Buffer::load(&old, Arc::new(CellTypeRegistry::new()), dir.path()).unwrap();
    let current = dir.path().join("current.zip");
    loaded.save(&current).unwrap();
    let reloaded = Buffer::load(&current, Arc::new(CellTypeRegistry::new()), dir.path()).unwrap();
    assert_eq!(reloaded.version(), FormatVersion::current(true));
    assert_eq!(rows(&reloaded), rows(&loaded));
}

#[test]
fn test_blobs_need_blob_capable_version() {
    let dir = TempDir::new().unwrap();
    let mut writer = BufferWriter::new(&options(&dir), Arc::new(CellTypeRegistry::new()), true);
    writer.add_row(DataRow::new("b", vec![DataCell::Blob(BlobCell::new("bin", vec![1u8, 2, 3]))])).unwrap();
    let buffer = writer
        .close(TableSchema::from_pairs(&[("b", DataType::Blob("bin".into()))]).unwrap())
        .unwrap();

    let path = dir.path().join("v3.zip");
    assert!(buffer.save_as(&path, FormatVersion::keyed(3).unwrap(), &mut |_| Ok(())).is_err());
    assert!(!path.exists());

    let path = dir.path().join("v4.zip");
    buffer.save_as(&path, FormatVersion::keyed(4).unwrap(), &mut |_| Ok(())).unwrap();
    assert!(entry_names(&path).iter().any(|name| name.starts_with("blobs/")));
    let loaded = Buffer::load(&path, Arc::new(CellTypeRegistry::new()), dir.path()).unwrap();
    match rows(&loaded)[0].cell(0) {
        Some(DataCell::Blob(blob)) => assert_eq!(&*blob.payload().unwrap(), &[1u8, 2, 3]),
        other => panic!("expected blob, got {:?}", other),
    }
}

#[test]
fn test_compressed_blobs_saved_as_version_4() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(CellTypeRegistry::new());
    registry.register_blob_type("png", true);
    let mut writer = BufferWriter::new(&options(&dir), Arc::clone(&registry), true);
    for i in 0..20u8 {
        let blob = DataCell::Blob(BlobCell::new("png", vec![i; 512]));
        writer.add_row(DataRow::new(format!("b{}", i), vec![blob])).unwrap();
    }
    let buffer = writer
        .close(TableSchema::from_pairs(&[("img", DataType::Blob("png".into()))]).unwrap())
        .unwrap();
    assert!(!buffer.is_in_memory());

    let v4 = dir.path().join("v4.zip");
    buffer.save_as(&v4, FormatVersion::keyed(4).unwrap(), &mut |_| Ok(())).unwrap();
    let blob_entries: Vec<String> =
        entry_names(&v4).into_iter().filter(|name| name.starts_with("blobs/")).collect();
    assert_eq!(blob_entries.len(), 20);
    assert!(blob_entries.iter().all(|name| name.ends_with(".bin")));

    let check = |loaded: &Buffer| {
        for (i, row) in rows(loaded).iter().enumerate() {
            match row.cell(0) {
                Some(DataCell::Blob(blob)) => assert_eq!(&*blob.payload().unwrap(), &vec![i as u8; 512][..]),
                other => panic!("expected blob, got {:?}", other),
            }
        }
    };
    let loaded = Buffer::load(&v4, Arc::clone(&registry), dir.path()).unwrap();
    check(&*loaded);

    // Upgrading the restored buffer keeps the blobs readable
    let v5 = dir.path().join("v5.zip");
    loaded.save(&v5).unwrap();
    check(&*Buffer::load(&v5, registry, dir.path()).unwrap());
}

#[test]
fn test_keyless_buffers_use_keyless_version() {
    let dir = TempDir::new().unwrap();
    let mut writer = BufferWriter::new(&options(&dir), Arc::new(CellTypeRegistry::new()), false);
    writer.add_row(row(1)).unwrap();
    let buffer = writer.close(schema()).unwrap();
    assert!(!buffer.is_keyed());

    let path = dir.path().join("keyless.zip");
    assert!(buffer.save_as(&path, FormatVersion::keyed(5).unwrap(), &mut |_| Ok(())).is_err());
    buffer.save(&path).unwrap();
    let loaded = Buffer::load(&path, Arc::new(CellTypeRegistry::new()), dir.path()).unwrap();
    assert_eq!(loaded.version(), FormatVersion::current(false));
    assert_eq!(rows(&loaded)[0].key().as_str(), "");
}

#[test]
fn test_unknown_and_missing_archives() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(CellTypeRegistry::new());
    assert!(FormatVersion::keyed(9).is_err());
    assert!(FormatVersion::parse("container_9.9.9").is_err());
    assert!(Buffer::load(&dir.path().join("nope.zip"), Arc::clone(&registry), dir.path()).is_err());

    let garbage = dir.path().join("garbage.zip");
    std::fs::write(&garbage, b"not a zip archive").unwrap();
    assert!(Buffer::load(&garbage, registry, dir.path()).is_err());
}
