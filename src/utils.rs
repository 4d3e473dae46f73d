//! Utility functions for the fingerprint library
//!
//! Hashing helpers and path manipulation shared by the collectors and the
//! pipelines.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use winfingerprint::utils::{hash_file_content, snapshot_name};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = hash_file_content(Path::new("setup.exe"))?;
//! assert_eq!(hash.len(), 64);
//! assert_eq!(snapshot_name(Path::new("out/before_files.csv")), "before_files");
//! # Ok(())
//! # }
//! ```

use filetime::FileTime;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, trace};

/// Read size used while hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash a file's content using SHA-256
///
/// Returns the digest as a 64-character lowercase hex string. The raw
/// `io::Error` is returned so callers can tell a vanished file
/// (`NotFound`) from one they are not allowed to read.
pub fn hash_file_content(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file, then put its last access time back
///
/// Reading a file updates its access time on most filesystems, which would
/// make the collector itself show up as a change in the next snapshot.
/// Failing to restore the time is logged and otherwise ignored.
pub fn hash_file_preserving_atime(path: &Path) -> io::Result<String> {
    let accessed = fs::metadata(path).map(|metadata| FileTime::from_last_access_time(&metadata))?;
    let hash = hash_file_content(path)?;
    if let Err(e) = filetime::set_file_atime(path, accessed) {
        debug!("Could not restore access time of {}: {}", path.display(), e);
    }
    trace!("Hashed {}", path.display());
    Ok(hash)
}

/// Hash arbitrary data using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Render a path the way snapshots store it
///
/// A Windows drive letter is upper-cased so that `c:\x` and `C:\x` from two
/// collection runs compare equal.
pub fn display_path(path: &Path) -> String {
    normalize_drive_letter(&path.to_string_lossy())
}

/// Upper-case a leading drive letter (`c:\...` becomes `C:\...`)
pub fn normalize_drive_letter(path: &str) -> String {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
            let mut normalized = String::with_capacity(path.len());
            normalized.push(letter.to_ascii_uppercase());
            normalized.push_str(&path[1..]);
            normalized
        }
        _ => path.to_string(),
    }
}

/// Short name of a snapshot, used to compose output file names
///
/// This is the file name without directory and extension.
pub fn snapshot_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Make a string safe to use as part of a file name
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
