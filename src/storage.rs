//! Durable JSON snapshots.
//!
//! Registry and audit state are whole-document snapshots replaced on every
//! mutation: serialize to a sibling temp file, fsync, rename over the live
//! document. A crash leaves either the old snapshot or the new one, never a
//! torn file.

use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Atomically replace the JSON document at `path` with `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the JSON document at `path`, or `None` if the file is absent.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&data).map(Some).map_err(io::Error::other)
}
