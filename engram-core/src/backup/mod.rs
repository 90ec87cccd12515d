//! JSONL backup files: one serialized activity per line.
//!
//! The writer gives every batch a durable home even when the database is
//! down; files rotate at a size threshold and carry the cycle start time
//! in their name. The reader powers bulk ingest and skips malformed lines
//! so one bad record never sinks a file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use engram_model::Activity;

use crate::error::{EngramError, Result};

/// Rotating JSONL writer for activity batches.
pub struct BackupWriter {
    dir: PathBuf,
    max_bytes: u64,
    current: Option<OpenFile>,
}

struct OpenFile {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes: u64,
}

impl std::fmt::Debug for BackupWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupWriter")
            .field("dir", &self.dir)
            .field("max_bytes", &self.max_bytes)
            .field(
                "current",
                &self.current.as_ref().map(|open| open.path.display().to_string()),
            )
            .finish()
    }
}

fn output_file_name() -> String {
    format!("activity_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S"))
}

impl BackupWriter {
    pub fn new(dir: impl Into<PathBuf>, max_file_size_mb: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(BackupWriter {
            dir,
            max_bytes: max_file_size_mb.max(1) * 1024 * 1024,
            current: None,
        })
    }

    /// Append a batch, rotating first when the open file is over the size
    /// threshold. Each line is a complete activity; the file is flushed
    /// before the call returns.
    pub fn write_batch(&mut self, activities: &[Activity]) -> Result<PathBuf> {
        self.rotate_if_needed()?;
        let open = match self.current.as_mut() {
            Some(open) => open,
            None => {
                let path = self.dir.join(output_file_name());
                tracing::info!(target: "backup", path = %path.display(), "creating backup file");
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                self.current.insert(OpenFile {
                    writer: BufWriter::new(file),
                    path,
                    bytes: 0,
                })
            }
        };

        for activity in activities {
            let line = serde_json::to_string(activity)?;
            open.writer.write_all(line.as_bytes())?;
            open.writer.write_all(b"\n")?;
            open.bytes += line.len() as u64 + 1;
        }
        open.writer.flush()?;
        Ok(open.path.clone())
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        if let Some(open) = self.current.as_ref()
            && open.bytes >= self.max_bytes
        {
            let open = self.current.take().expect("checked above");
            tracing::info!(
                target: "backup",
                path = %open.path.display(),
                size_mb = open.bytes / (1024 * 1024),
                "rotating backup file"
            );
            drop(open);
        }
        Ok(())
    }

    /// Flush and close the open file, if any.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut open) = self.current.take() {
            open.writer.flush()?;
        }
        Ok(())
    }
}

/// One line's parse outcome during bulk ingest.
#[derive(Debug)]
pub struct LineError {
    pub line_number: usize,
    pub error: EngramError,
}

/// Read a JSONL file of activities, collecting parse failures per line
/// instead of failing the file. Naive timestamps are parse failures.
pub fn read_activities(path: &Path) -> Result<(Vec<Activity>, Vec<LineError>)> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            EngramError::NotFound(format!("input file {}", path.display()))
        } else {
            err.into()
        }
    })?;

    let mut activities = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_number = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                errors.push(LineError {
                    line_number,
                    error: err.into(),
                });
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Activity>(&line) {
            Ok(activity) => match activity.validate() {
                Ok(()) => activities.push(activity),
                Err(err) => errors.push(LineError {
                    line_number,
                    error: err.into(),
                }),
            },
            Err(err) => errors.push(LineError {
                line_number,
                error: err.into(),
            }),
        }
    }

    Ok((activities, errors))
}
