#![no_main]
use libfuzzer_sys::fuzz_target;
use marfs::Volume;
use std::io::Cursor;

// Arbitrary bytes as an image: opening and walking it must fail cleanly,
// never panic or loop.
fuzz_target!(|data: &[u8]| {
    let vol = match Volume::open(Cursor::new(data.to_vec())) {
        Ok(vol) => vol,
        Err(_) => return,
    };

    let _ = vol.stats();
    if let Ok(entries) = vol.read_dir("/") {
        for entry in entries.iter().take(64) {
            let path = format!("/{}", entry.name);
            let _ = vol.metadata(&path);
            let _ = vol.read(&path, 0, 4096);
            let _ = vol.list(&path);
        }
    }
});
