//! # CLI - FlintKV Interactive Shell
//!
//! A REPL-style command-line interface over a flash image file. The image
//! is loaded into an in-memory NOR simulator, mounted, and written back to
//! disk after every mutating command, so a session's effects persist across
//! runs. Designed for both interactive use and scripted testing (pipe
//! commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! SIZE key           Print the stored value's size in bytes
//! LIST               Print every live key-value pair
//! STATS              Print space accounting and store counters
//! GC                 Collect one sector of garbage
//! EXIT / QUIT        Shut down
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! FLINT_IMG           Flash image file path     (default: "flint.img")
//! FLINT_SECTORS       Sector count, new images  (default: 16)
//! FLINT_SECTOR_BYTES  Sector size, new images   (default: 4096)
//! FLINT_REDUNDANCY    Copies per entry          (default: 1)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! FlintKV mounted (img=flint.img, 16x4096B sectors, 0 keys, txn=0)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > STATS
//! keys: 1 (txn 1)
//! writable: 57344B  in use: 32B  reclaimable: 0B
//! > EXIT
//! bye
//! ```

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use engine::{KvStore, Options};
use entry::{Crc32, EntryFormat};
use flash::{FlashPartition, MemFlash};

/// Entry magic for images produced by this tool.
const IMAGE_MAGIC: u32 = 0x464C_4E54; // "FLNT"

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Loads the image file, or builds a blank partition if it does not exist.
fn load_flash(path: &Path, sectors: usize, sector_bytes: usize) -> Result<MemFlash> {
    if path.exists() {
        let image = fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        if image.is_empty() || image.len() % sector_bytes != 0 {
            bail!(
                "image {} is {} bytes, not a multiple of the {}B sector size",
                path.display(),
                image.len(),
                sector_bytes
            );
        }
        Ok(MemFlash::from_image(image, sector_bytes, 16))
    } else {
        Ok(MemFlash::new(sectors, sector_bytes, 16))
    }
}

fn save_image(path: &Path, store: &KvStore<MemFlash, Crc32>) -> Result<()> {
    fs::write(path, store.partition().image())
        .with_context(|| format!("failed to write image {}", path.display()))
}

fn main() -> Result<()> {
    let img_path = env_or("FLINT_IMG", "flint.img");
    let sectors: usize = env_or("FLINT_SECTORS", "16").parse().unwrap_or(16);
    let sector_bytes: usize = env_or("FLINT_SECTOR_BYTES", "4096").parse().unwrap_or(4096);
    let redundancy: usize = env_or("FLINT_REDUNDANCY", "1").parse().unwrap_or(1);

    let img_path = Path::new(&img_path);
    let flash = load_flash(img_path, sectors, sector_bytes)?;

    let options = Options {
        redundancy,
        ..Options::default()
    };
    let mut store = KvStore::new(flash, Crc32::new(), EntryFormat::new(IMAGE_MAGIC), options);
    let report = store.mount().context("mount failed")?;
    if report.data_loss() {
        eprintln!(
            "warning: image holds corrupt data ({} entries, {} bytes written off)",
            report.corrupt_entries, report.corrupt_bytes
        );
    }

    println!(
        "FlintKV mounted (img={}, {}x{}B sectors, {} keys, txn={})",
        img_path.display(),
        store.partition().sector_count(),
        sector_bytes,
        store.len(),
        store.transaction_count()
    );
    println!("Commands: SET key value | GET key | DEL key | SIZE key");
    println!("          LIST | STATS | GC | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match store.put(k.as_bytes(), v.as_bytes()) {
                                Ok(()) => {
                                    save_image(img_path, &store)?;
                                    println!("OK");
                                }
                                Err(e) => println!("ERR set failed: {e}"),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        let mut buf = vec![0u8; sector_bytes];
                        match store.get(k.as_bytes(), &mut buf) {
                            Ok(n) => println!("{}", String::from_utf8_lossy(&buf[..n])),
                            Err(engine::Error::NotFound) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match store.delete(k.as_bytes()) {
                            Ok(()) => {
                                save_image(img_path, &store)?;
                                println!("OK");
                            }
                            Err(engine::Error::NotFound) => println!("(nil)"),
                            Err(e) => println!("ERR delete failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "SIZE" => {
                    if let Some(k) = parts.next() {
                        match store.value_size(k.as_bytes()) {
                            Ok(n) => println!("{n}"),
                            Err(engine::Error::NotFound) => println!("(nil)"),
                            Err(e) => println!("ERR size failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: SIZE key");
                    }
                }
                "LIST" => {
                    let mut count = 0usize;
                    for item in store.iter() {
                        let mut buf = vec![0u8; sector_bytes];
                        match item.value(&mut buf) {
                            Ok(n) => {
                                println!(
                                    "{} -> {}",
                                    String::from_utf8_lossy(item.key()),
                                    String::from_utf8_lossy(&buf[..n])
                                )
                            }
                            Err(e) => {
                                println!("{} -> ERR {e}", String::from_utf8_lossy(item.key()))
                            }
                        }
                        count += 1;
                    }
                    println!("({count} entries)");
                }
                "STATS" => {
                    let stats = store.stats();
                    println!("keys: {} (txn {})", store.len(), store.transaction_count());
                    println!(
                        "writable: {}B  in use: {}B  reclaimable: {}B",
                        stats.writable_bytes, stats.in_use_bytes, stats.reclaimable_bytes
                    );
                }
                "GC" => match store.garbage_collect_partial() {
                    Ok(()) => {
                        save_image(img_path, &store)?;
                        println!("OK ({}B reclaimable)", store.stats().reclaimable_bytes);
                    }
                    Err(e) => println!("ERR gc failed: {e}"),
                },
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => println!("ERR unknown command: {other}"),
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    save_image(img_path, &store)?;
    Ok(())
}
