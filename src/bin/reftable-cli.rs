use std::io::{self, Write, stdin};
use std::path::PathBuf;

use reftable::{RefRecord, Stack, StackConfig};

fn main() -> io::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <directory>", args[0]);
        std::process::exit(1);
    }

    let dir = PathBuf::from(&args[1]);
    let manifest_path = dir.join("manifest");

    let stack = match Stack::open(&dir, &manifest_path, StackConfig::default()) {
        Ok(stack) => stack,
        Err(e) => {
            eprintln!("Failed to open stack: {e}");
            std::process::exit(1);
        }
    };
    log::info!("opened reftable stack at {}", dir.display());

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut cmd = String::new();
        if stdin().read_line(&mut cmd)? == 0 {
            return Ok(());
        }
        let cmd = cmd.trim();
        if cmd.is_empty() {
            continue;
        }

        let parts: Vec<&str> = cmd.split_whitespace().collect();
        match parts[0] {
            "exit" => return Ok(()),

            "get" => {
                if parts.len() != 2 {
                    eprintln!("Usage: get <ref>");
                    continue;
                }
                let records = stack.seek_ref(parts[1]);
                match records.iter().find(|r| r.ref_name == parts[1]) {
                    Some(r) if !r.is_deletion() => match &r.value {
                        reftable::RefValue::Value(v) => {
                            eprintln!("{}", String::from_utf8_lossy(v))
                        }
                        reftable::RefValue::Deletion => unreachable!(),
                    },
                    _ => eprintln!("ref not found"),
                }
            }

            "set" => {
                if parts.len() != 3 {
                    eprintln!("Usage: set <ref> <value>");
                    continue;
                }
                let (name, value) = (parts[1].to_string(), parts[2].as_bytes().to_vec());
                let result = stack.add(move |writer, next| {
                    writer.set_limits(next, next)?;
                    writer.add_ref(RefRecord::value(name, next, value))
                });
                match result {
                    Ok(true) => eprintln!("ref set"),
                    Ok(false) => eprintln!("nothing to do"),
                    Err(e) => {
                        log::info!("add failed: {e}");
                        eprintln!("failed to set ref: {e}")
                    }
                }
            }

            "delete" => {
                if parts.len() != 2 {
                    eprintln!("Usage: delete <ref>");
                    continue;
                }
                let name = parts[1].to_string();
                let result = stack.add(move |writer, next| {
                    writer.set_limits(next, next)?;
                    writer.add_ref(RefRecord::deletion(name, next))
                });
                match result {
                    Ok(true) => eprintln!("ref deleted"),
                    Ok(false) => eprintln!("nothing to do"),
                    Err(e) => eprintln!("failed to delete ref: {e}"),
                }
            }

            "compact" => match stack.compact_all() {
                Ok(true) => eprintln!("compacted"),
                Ok(false) => eprintln!("already compact"),
                Err(e) => eprintln!("compaction failed: {e}"),
            },

            other => eprintln!("Unknown command: {other}"),
        }
    }
}
