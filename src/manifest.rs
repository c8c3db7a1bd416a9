//! The manifest is a plain newline-separated list of table filenames, always
//! replaced as a whole via an exclusive-create lock file renamed over it.
//! Reading and encoding are kept as pure functions so the round-trip law
//! (`decode(encode(names)) == names`) can be tested without touching a
//! filesystem lock.
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub fn read_names(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(decode_names(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn decode_names(content: &str) -> Vec<String> {
    content.lines().filter(|l| !l.is_empty()).map(str::to_owned).collect()
}

pub fn encode_names(names: &[String]) -> String {
    let mut out = String::new();
    for name in names {
        out.push_str(name);
        out.push('\n');
    }
    out
}

/// Path of the lock file a writer races to exclusively create before
/// publishing a new manifest: the manifest path with a literal `.lock`
/// suffix appended, not an extension swap, so a manifest path that already
/// carries an extension doesn't collide with a sibling file.
pub fn lock_path(manifest_path: &Path) -> PathBuf {
    let mut name = OsString::from(manifest_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let names = vec!["a.ref".to_string(), "b.ref".to_string()];
        assert_eq!(decode_names(&encode_names(&names)), names);
    }

    #[test]
    fn empty_manifest_round_trips() {
        let names: Vec<String> = Vec::new();
        assert_eq!(decode_names(&encode_names(&names)), names);
    }

    #[test]
    fn missing_manifest_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let names = read_names(&dir.path().join("absent")).unwrap();
        assert!(names.is_empty());
    }
}
