//! Minimal walkthrough of the facade: open, grow, map, write through the
//! mapping, read back, and sync.

use exfile::{ExtendableFile, OpenOptions, ResizePolicy};

fn main() -> exfile::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("demo.exfile");

    let f = ExtendableFile::open(
        OpenOptions::new(&path).initial_size(4096).rspolicy(ResizePolicy::Fibonacci { prev_size: 0 }),
    )?;

    f.add_mmap(0, 1 << 20)?;
    f.write(0, b"hello, extendable file")?;

    let mut buf = [0u8; 23];
    f.read(0, &mut buf)?;
    println!("read back: {:?}", std::str::from_utf8(&buf).unwrap());

    f.ensure_size(9000)?;
    println!("state after growth: {:?}", f.state()?);

    f.sync(exfile::SyncFlags::Sync)?;
    f.close()?;
    Ok(())
}
