//! Durable log backends
//!
//! The store appends exactly one record per mutation and applies it to its
//! in-memory tables only after the backend reports success.
//!
//! `LogWriter` guarantees on failure:
//! - a failed write or fsync truncates the file back to the last good
//!   record before the error is returned
//! - if that truncation fails too, the writer is poisoned and refuses every
//!   later append, so no record can land behind a torn frame
//!
//! The writer holds an exclusive OS lock on the log for its lifetime. A
//! second writer on the same data directory, in this process or another,
//! is refused with `TAP_STORE_LOCKED`.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::errors::{StoreError, StoreResult};
use super::record::LogRecord;
use crate::observability::{log_event_with_fields, Event as ObsEvent};

/// Name of the log file under `<data_dir>/data/`
pub const LOG_FILE_NAME: &str = "events.log";

/// Destination for durable log records.
pub trait LogBackend: Send {
    /// Append one record. The record MUST be durable when this returns `Ok`.
    fn append(&mut self, record: &LogRecord) -> StoreResult<()>;
}

/// Append-only file writer with fsync after every record.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    current_offset: u64,
    poisoned: bool,
}

impl LogWriter {
    /// Opens or creates `<data_dir>/data/events.log`, creating directories
    /// as needed.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        let data_subdir = data_dir.join("data");
        let path = data_subdir.join(LOG_FILE_NAME);

        if !data_subdir.exists() {
            fs::create_dir_all(&data_subdir).map_err(|e| {
                StoreError::io_error(
                    format!("Failed to create data directory: {}", data_subdir.display()),
                    e,
                )
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                StoreError::io_error(format!("Failed to open log: {}", path.display()), e)
            })?;

        // Released when the file is closed, including on process exit
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(StoreError::locked(&path)),
            Err(TryLockError::Error(e)) => {
                return Err(StoreError::io_error(
                    format!("Failed to lock log: {}", path.display()),
                    e,
                ))
            }
        }

        let current_offset = file
            .metadata()
            .map_err(|e| StoreError::io_error("Failed to read log metadata", e))?
            .len();

        Ok(Self {
            path,
            file,
            current_offset,
            poisoned: false,
        })
    }

    /// Path of the log file for a data directory.
    pub fn log_path(data_dir: &Path) -> PathBuf {
        data_dir.join("data").join(LOG_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        // fsync is mandatory before the mutation becomes visible
        self.file.sync_all()
    }

    /// Cut the file back to the end of the last durable record.
    fn discard_tail(&mut self) -> io::Result<()> {
        self.file.set_len(self.current_offset)?;
        self.file.sync_all()
    }
}

impl LogBackend for LogWriter {
    fn append(&mut self, record: &LogRecord) -> StoreResult<()> {
        let bytes = record.serialize().map_err(|e| {
            StoreError::write_failed_no_source(format!("Failed to encode record: {}", e))
        })?;

        if self.poisoned {
            return Err(StoreError::write_failed_no_source(format!(
                "Log writer is poisoned after a failed rollback: {}",
                self.path.display()
            )));
        }

        if let Err(e) = self.write_frame(&bytes) {
            if let Err(rollback) = self.discard_tail() {
                self.poisoned = true;
                log_event_with_fields(
                    ObsEvent::StorageFailure,
                    &[
                        ("path", &self.path.display().to_string()),
                        ("rollback_error", &rollback.to_string()),
                    ],
                );
            }
            return Err(StoreError::write_failed("Failed to append record", e));
        }

        self.current_offset += bytes.len() as u64;
        Ok(())
    }
}

/// Volatile backend: records are kept only in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Vec<LogRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }
}

impl LogBackend for MemoryBackend {
    fn append(&mut self, record: &LogRecord) -> StoreResult<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::reader::LogReader;
    use crate::store::record::CounterState;
    use tempfile::TempDir;

    fn counter(next: u64) -> LogRecord {
        LogRecord::CounterAdvanced(CounterState {
            session_id: "day-1".into(),
            next_token_id: next,
        })
    }

    #[test]
    fn test_writer_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let data_path = temp_dir.path().join("data");
        assert!(!data_path.exists());

        let writer = LogWriter::open(temp_dir.path()).unwrap();
        assert!(data_path.join(LOG_FILE_NAME).exists());
        assert_eq!(writer.path(), LogWriter::log_path(temp_dir.path()));
    }

    #[test]
    fn test_append_then_read_back() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut writer = LogWriter::open(temp_dir.path()).unwrap();
            writer.append(&counter(2)).unwrap();
            writer.append(&counter(3)).unwrap();
            assert!(writer.current_offset() > 0);
        }

        let mut reader = LogReader::open(&LogWriter::log_path(temp_dir.path())).unwrap();
        assert_eq!(reader.read_all().unwrap(), vec![counter(2), counter(3)]);
    }

    #[test]
    fn test_reopen_continues_at_end() {
        let temp_dir = TempDir::new().unwrap();
        let first_offset = {
            let mut writer = LogWriter::open(temp_dir.path()).unwrap();
            writer.append(&counter(2)).unwrap();
            writer.current_offset()
        };

        let mut writer = LogWriter::open(temp_dir.path()).unwrap();
        assert_eq!(writer.current_offset(), first_offset);
        writer.append(&counter(3)).unwrap();
        assert!(writer.current_offset() > first_offset);
    }

    #[test]
    fn test_second_writer_is_refused_until_first_closes() {
        let temp_dir = TempDir::new().unwrap();
        let first = LogWriter::open(temp_dir.path()).unwrap();

        let err = match LogWriter::open(temp_dir.path()) {
            Ok(_) => panic!("second writer opened on a held log"),
            Err(e) => e,
        };
        assert!(err.is_locked());

        drop(first);
        assert!(LogWriter::open(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = LogWriter::open(temp_dir.path()).unwrap();
        writer.append(&counter(2)).unwrap();
        let good_offset = writer.current_offset();

        // half a frame left behind by an interrupted write
        let frame = counter(3).serialize().unwrap();
        writer.file.write_all(&frame[..frame.len() / 2]).unwrap();
        writer.discard_tail().unwrap();
        assert_eq!(
            fs::metadata(writer.path()).unwrap().len(),
            good_offset
        );

        writer.append(&counter(4)).unwrap();
        drop(writer);

        let mut reader = LogReader::open(&LogWriter::log_path(temp_dir.path())).unwrap();
        assert_eq!(reader.read_all().unwrap(), vec![counter(2), counter(4)]);
    }

    #[test]
    fn test_poisoned_writer_refuses_appends() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = LogWriter::open(temp_dir.path()).unwrap();
        writer.poisoned = true;

        let err = writer.append(&counter(2)).unwrap_err();
        assert!(err.to_string().contains("poisoned"));
        assert_eq!(writer.current_offset(), 0);
        assert!(writer.is_poisoned());
    }

    #[test]
    fn test_memory_backend_keeps_records() {
        let mut backend = MemoryBackend::new();
        backend.append(&counter(5)).unwrap();
        assert_eq!(backend.records(), &[counter(5)]);
    }
}
