//! Path resolution tests

use marfs::{format, EntryKind, MarfsError, Volume};
use std::io::Cursor;

fn volume(sectors: usize, sector_size: u32) -> Volume<Cursor<Vec<u8>>> {
    format(
        Cursor::new(vec![0u8; sectors * sector_size as usize]),
        sector_size,
    )
    .unwrap()
}

#[test]
fn test_create_on_empty_root() {
    let mut vol = volume(8, 1024);
    vol.create_file("/a.txt").unwrap();

    let entry = vol.resolve("/a.txt").unwrap().unwrap();
    assert_eq!(entry.kind, EntryKind::File);
    assert_eq!(vol.metadata("/a.txt").unwrap().size, 0);

    let names = vol.list("/").unwrap();
    assert_eq!(&names[..2], &[".", ".."]);
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"a.txt".to_string()));
}

#[test]
fn test_exact_length_matching() {
    let mut vol = volume(8, 1024);
    vol.create_file("/foo").unwrap();

    assert!(vol.resolve("/foobar").unwrap().is_none());
    assert!(vol.resolve("/fo").unwrap().is_none());

    let mut vol = volume(8, 1024);
    vol.create_file("/foobar").unwrap();
    assert!(vol.resolve("/foo").unwrap().is_none());
    assert!(vol.resolve("/foobar").unwrap().is_some());
}

#[test]
fn test_nested_resolution() {
    let mut vol = volume(16, 1024);
    vol.create_dir("/a").unwrap();
    vol.create_dir("/a/b").unwrap();
    vol.create_dir("/a/b/c").unwrap();
    let file = vol.create_file("/a/b/c/leaf").unwrap();

    assert_eq!(vol.resolve("/a/b/c/leaf").unwrap().unwrap().id, file.id);
    assert_eq!(vol.resolve("a/b/c/leaf").unwrap().unwrap().id, file.id);
    assert_eq!(vol.resolve("//a///b/c//leaf").unwrap().unwrap().id, file.id);

    let dir = vol.resolve("/a/b/c/").unwrap().unwrap();
    assert_eq!(dir.kind, EntryKind::Directory);
}

#[test]
fn test_cannot_descend_into_file() {
    let mut vol = volume(8, 1024);
    vol.create_file("/file").unwrap();

    assert!(vol.resolve("/file/child").unwrap().is_none());
    assert!(matches!(
        vol.create_file("/file/child"),
        Err(MarfsError::NotADirectory(_))
    ));
}

#[test]
fn test_resolve_from_subdirectory() {
    let mut vol = volume(8, 1024);
    let docs = vol.create_dir("/docs").unwrap();
    let file = vol.create_file("/docs/notes").unwrap();

    assert_eq!(vol.resolve_from("notes", docs.id).unwrap().unwrap().id, file.id);
    assert_eq!(vol.resolve_from("", docs.id).unwrap().unwrap().id, docs.id);
    assert_eq!(vol.lookup(docs.id, "notes").unwrap().unwrap().id, file.id);
    assert!(vol.lookup(docs.id, "other").unwrap().is_none());
}

#[test]
fn test_lookup_spans_overflow_sectors() {
    // 128-byte sectors hold two records per directory sector
    let mut vol = volume(64, 128);
    for i in 0..9 {
        vol.create_file(&format!("/entry{}", i)).unwrap();
    }

    for i in 0..9 {
        let path = format!("/entry{}", i);
        assert!(vol.resolve(&path).unwrap().is_some(), "{} missing", path);
    }

    let listing = vol.read_dir("/").unwrap();
    assert_eq!(listing.len(), 9);
    assert!(listing.iter().all(|entry| entry.kind == EntryKind::File));
}

#[test]
fn test_name_limits() {
    let mut vol = volume(8, 1024);
    let longest = format!("/{}", "n".repeat(32));
    vol.create_file(&longest).unwrap();
    assert!(vol.exists(&longest).unwrap());

    let too_long = format!("/{}", "n".repeat(33));
    assert!(matches!(
        vol.create_file(&too_long),
        Err(MarfsError::NameTooLong(_))
    ));
    assert!(matches!(vol.create_dir("/.."), Err(MarfsError::InvalidName(_))));
}

#[test]
fn test_not_found_distinct_from_wrong_kind() {
    let mut vol = volume(8, 1024);
    vol.create_file("/file").unwrap();

    let missing = vol.create_file("/nodir/x").unwrap_err();
    let wrong_kind = vol.create_file("/file/x").unwrap_err();

    assert!(matches!(missing, MarfsError::NotFound(_)));
    assert!(matches!(wrong_kind, MarfsError::NotADirectory(_)));
    assert_ne!(missing.errno(), wrong_kind.errno());
}
