use super::format::SerializedFrame;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// File name of a state dump: `core-<thread>[-<suffix>].json`
pub fn dump_file_name(thread: u64, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) if !s.is_empty() => format!("core-{}-{}.json", thread, s),
        _ => format!("core-{}.json", thread),
    }
}

/// Write serialized frames as a JSON array into `dir`
///
/// Returns the path written.
pub fn write_dump(
    dir: &Path,
    thread: u64,
    suffix: Option<&str>,
    frames: &[SerializedFrame],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(dump_file_name(thread, suffix));
    let mut out = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut out, frames)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(path)
}
