//! Service log files.
//!
//! Every service writes stdout and stderr to `<data_dir>/<log_dir>/<id>.log`.
//! Migration output for the service is appended to the same file.

use crate::config::Service;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Lines returned by a tail request when none are asked for.
pub const DEFAULT_TAIL_LINES: usize = 200;

/// Upper bound on a single tail request.
pub const MAX_TAIL_LINES: usize = 5000;

/// Path of the log file for `service` under `data_dir`.
pub fn log_path_for(data_dir: &Path, service: &Service) -> PathBuf {
    data_dir
        .join(service.log_dir())
        .join(format!("{}.log", service.id))
}

/// Clamp a requested line count to `1..=MAX_TAIL_LINES`.
pub fn clamp_tail_lines(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_TAIL_LINES)
        .clamp(1, MAX_TAIL_LINES)
}

/// Read the last `count` lines of the file at `path`.
pub fn tail_lines(path: &Path, count: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    // Estimate: assume ~200 bytes per line, read what we need
    let estimated_bytes = (count as u64).saturating_mul(200);
    let start_pos = file_size.saturating_sub(estimated_bytes);

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start_pos))?;

    // If we seeked to middle of file, skip partial first line
    if start_pos > 0 {
        let mut partial = Vec::new();
        reader.read_until(b'\n', &mut partial)?;
    }

    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }

    let skip = lines.len().saturating_sub(count);
    Ok(lines.split_off(skip))
}

/// [`tail_lines`] on the blocking pool.
pub async fn read_tail(path: PathBuf, count: usize) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || tail_lines(&path, count))
        .await
        .map_err(|e| Error::Filesystem(format!("Log read task failed: {}", e)))?
        .map_err(Error::from)
}
