#![no_main]
use libfuzzer_sys::{
    arbitrary::{Arbitrary, Unstructured},
    fuzz_target,
};
use marfs::format;
use std::io::Cursor;

const NAMES: [&str; 6] = ["/a", "/b", "/d", "/d/x", "/d/e", "/d/e/y"];

#[derive(Debug, Arbitrary)]
enum Op {
    CreateFile(u8),
    CreateDir(u8),
    Write { path: u8, offset: u16, data: Vec<u8> },
    Read { path: u8, offset: u16, len: u16 },
    Truncate { path: u8, size: u16 },
    Remove(u8),
    RemoveDir(u8),
    Rename { from: u8, to: u8 },
}

fn name(idx: u8) -> &'static str {
    NAMES[idx as usize % NAMES.len()]
}

// Random operation sequences on a small 128-byte-sector image. Any error is
// fine; panics and broken invariants are not.
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let ops: Vec<Op> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let mut vol = match format(Cursor::new(vec![0u8; 48 * 128]), 128) {
        Ok(vol) => vol,
        Err(_) => return,
    };

    for op in ops.iter().take(64) {
        let _ = match op {
            Op::CreateFile(p) => vol.create_file(name(*p)).map(|_| ()),
            Op::CreateDir(p) => vol.create_dir(name(*p)).map(|_| ()),
            Op::Write { path, offset, data } => {
                vol.write(name(*path), *offset as u64, data).map(|_| ())
            }
            Op::Read { path, offset, len } => {
                vol.read(name(*path), *offset as u64, *len as usize).map(|_| ())
            }
            Op::Truncate { path, size } => vol.truncate(name(*path), *size as u64),
            Op::Remove(p) => vol.remove_file(name(*p)),
            Op::RemoveDir(p) => vol.remove_dir(name(*p)),
            Op::Rename { from, to } => vol.rename(name(*from), name(*to)),
        };
    }

    // whatever happened, the image must still walk cleanly
    let stats = vol.stats().expect("stats after ops");
    assert!(stats.free_sectors < stats.total_sectors);
    vol.list("/").expect("root listing after ops");
});
