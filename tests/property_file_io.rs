//! Property-based tests for file contents and sector accounting
//!
//! Uses proptest to compare the filesystem against a plain in-memory model
//! across many random operation sequences.

use marfs::{format, MarfsError, Volume};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::io::Cursor;

const S: u32 = 128;
const PAYLOAD: usize = 108;

fn volume(sectors: usize) -> Volume<Cursor<Vec<u8>>> {
    format(Cursor::new(vec![0u8; sectors * S as usize]), S).unwrap()
}

fn sectors_for(size: usize) -> u32 {
    size.div_ceil(PAYLOAD).max(1) as u32
}

#[derive(Debug, Clone)]
enum FileOp {
    Write { offset: usize, data: Vec<u8> },
    Truncate { size: usize },
}

fn file_op() -> impl Strategy<Value = FileOp> {
    prop_oneof![
        3 => (0usize..1500, prop::collection::vec(any::<u8>(), 1..400))
            .prop_map(|(offset, data)| FileOp::Write { offset, data }),
        1 => (0usize..2000).prop_map(|size| FileOp::Truncate { size }),
    ]
}

proptest! {
    #[test]
    fn prop_file_matches_model(ops in prop::collection::vec(file_op(), 1..25)) {
        let mut vol = volume(128);
        vol.create_file("/f").unwrap();
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                FileOp::Write { offset, data } => {
                    vol.write("/f", offset as u64, &data).unwrap();
                    if model.len() < offset + data.len() {
                        model.resize(offset + data.len(), 0);
                    }
                    model[offset..offset + data.len()].copy_from_slice(&data);
                }
                FileOp::Truncate { size } => {
                    vol.truncate("/f", size as u64).unwrap();
                    model.resize(size, 0);
                }
            }

            prop_assert_eq!(vol.metadata("/f").unwrap().size, model.len() as u64);
        }

        prop_assert_eq!(vol.read("/f", 0, 4096).unwrap(), model.clone());

        // one header, one root sector, and exactly the file's chain
        let stats = vol.stats().unwrap();
        prop_assert_eq!(stats.used_sectors, 2 + sectors_for(model.len()));
    }

    #[test]
    fn prop_no_double_allocation(sizes in prop::collection::vec(0usize..600, 1..12)) {
        let mut vol = volume(256);
        let mut expected_used = 2u32;

        for (i, size) in sizes.iter().enumerate() {
            let path = format!("/file{}", i);
            vol.create_file(&path).unwrap();
            vol.write(&path, 0, &vec![i as u8; *size]).unwrap();
            expected_used += sectors_for(*size);
        }

        // root grows by one sector per two records
        expected_used += sizes.len().div_ceil(2).max(1) as u32 - 1;
        prop_assert_eq!(vol.stats().unwrap().used_sectors, expected_used);

        // a sector shared between two files would clobber one of them
        for (i, size) in sizes.iter().enumerate() {
            let data = vol.read(&format!("/file{}", i), 0, 1024).unwrap();
            prop_assert_eq!(data, vec![i as u8; *size]);
        }
    }

    #[test]
    fn prop_exhaustion_is_clean(file_count in 1usize..40) {
        let mut vol = volume(16);
        let mut created = Vec::new();

        for i in 0..file_count {
            let path = format!("/f{}", i);
            match vol.create_file(&path) {
                Ok(_) => created.push(path),
                Err(MarfsError::OutOfSpace) => break,
                Err(e) => return Err(TestCaseError::fail(format!("unexpected {:?}", e))),
            }
        }

        let listed = vol.read_dir("/").unwrap();
        prop_assert_eq!(listed.len(), created.len());
        for path in &created {
            prop_assert!(vol.exists(path).unwrap());
        }
    }

    #[test]
    fn prop_names_resolve_exactly(
        names in prop::collection::btree_set("[a-z]{1,8}", 1..10)
    ) {
        let mut vol = volume(64);
        let mut sectors = BTreeMap::new();
        for name in &names {
            let header = vol.create_file(&format!("/{}", name)).unwrap();
            sectors.insert(name.clone(), header.id);
        }

        for (name, sector) in &sectors {
            let found = vol.resolve(&format!("/{}", name)).unwrap().unwrap();
            prop_assert_eq!(found.id, *sector);

            let longer = format!("/{}x", name);
            if !names.contains(&format!("{}x", name)) {
                prop_assert!(vol.resolve(&longer).unwrap().is_none());
            }
        }
    }
}
