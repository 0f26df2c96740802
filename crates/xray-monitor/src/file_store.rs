//! Filesystem-backed trace storage: one pretty-printed JSON file per trace.
//!
//! Saves write to a uniquely named temporary file in the same directory,
//! fsync it, and rename it over `<id>.json`, so readers never observe a
//! truncated record even when two writers race on the same id.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;
use xray_core::{Trace, TraceSummary};

use crate::store::{sort_summaries, StoreError, TraceStore};

const RECORD_EXT: &str = ".json";
const TEMP_EXT: &str = ".tmp";

/// Directory of `<id>.json` trace records.
#[derive(Debug, Clone)]
pub struct FileTraceStore {
    dir: PathBuf,
}

impl FileTraceStore {
    /// Creates a store rooted at `dir`. The directory is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{RECORD_EXT}"))
    }

    fn read_record(path: &Path) -> Result<Option<Trace>, StoreError> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }
}

/// Ids become file names: each must be a single, visible path component.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.chars().any(|c| {
            c.is_control() || matches!(c, '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*')
        })
}

fn write_atomic(target: &Path, temp: &Path, body: &[u8]) -> Result<(), StoreError> {
    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(temp)?;
        file.write_all(body)?;
        file.sync_all()?;
        fs::rename(temp, target)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(temp);
        return Err(StoreError::io(target, e));
    }

    // fsync the directory so the rename itself is durable
    if let Some(dir) = target.parent() {
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

impl TraceStore for FileTraceStore {
    fn save(&self, trace: &Trace) -> Result<(), StoreError> {
        if !is_valid_id(&trace.id) {
            return Err(StoreError::InvalidId(trace.id.clone()));
        }
        self.ensure_dir()?;

        let body = serde_json::to_vec_pretty(trace)?;
        let target = self.record_path(&trace.id);
        let temp = self
            .dir
            .join(format!(".{}.{}{TEMP_EXT}", trace.id, Uuid::new_v4().simple()));

        write_atomic(&target, &temp, &body)?;
        tracing::debug!(trace_id = %trace.id, path = %target.display(), "Saved trace");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Trace>, StoreError> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        Self::read_record(&self.record_path(id))
    }

    fn list(&self) -> Result<Vec<TraceSummary>, StoreError> {
        self.ensure_dir()?;
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Failed to read trace directory entry: {}", e);
                    continue;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(RECORD_EXT) {
                continue;
            }

            let path = entry.path();
            match Self::read_record(&path) {
                Ok(Some(trace)) => summaries.push(trace.summary()),
                // deleted between read_dir and read
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable trace: {}", e);
                }
            }
        }

        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if !is_valid_id(id) {
            return Ok(false);
        }

        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(trace_id = %id, "Deleted trace");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(RECORD_EXT) {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "Failed to remove trace: {}", e);
                }
            }
        }

        tracing::debug!(removed, "Cleared traces");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_trace;
    use std::sync::Arc;
    use std::thread;
    use xray_core::{json, Candidate, Evaluation, IntoData, TraceStatus, Value};

    fn temp_store() -> (tempfile::TempDir, FileTraceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTraceStore::new(dir.path().join("traces"));
        (dir, store)
    }

    #[test]
    fn test_save_creates_directory_and_round_trips() {
        let (_dir, store) = temp_store();
        assert!(!store.dir().exists());

        let trace = sample_trace("trace-1", 0);
        store.save(&trace).unwrap();

        assert!(store.dir().join("trace-1.json").exists());
        assert_eq!(store.get("trace-1").unwrap(), Some(trace));
    }

    #[test]
    fn test_round_trip_keeps_null_values_and_sub_millisecond_times() {
        let (_dir, store) = temp_store();
        let mut trace = sample_trace("trace-1", 0);
        trace.start_time = trace.start_time + chrono::Duration::nanoseconds(123_456_789);
        trace.steps[0].candidates = Some(vec![Candidate::new("p1", "Bottle").evaluation(
            Evaluation::new("price", "Price known", false, "missing price").with_value(Value::Null),
        )]);
        store.save(&trace).unwrap();

        let raw = fs::read_to_string(store.dir().join("trace-1.json")).unwrap();
        assert!(raw.contains("\"value\": null"));
        assert!(raw.contains("\"startTime\": \"2023-11-14T22:13:20.123456789Z\""));

        assert_eq!(store.get("trace-1").unwrap(), Some(trace.clone()));
        assert_eq!(store.list().unwrap(), vec![trace.summary()]);
    }

    #[test]
    fn test_record_layout() {
        let (_dir, store) = temp_store();
        store.save(&sample_trace("trace-1", 0)).unwrap();

        let raw = fs::read_to_string(store.dir().join("trace-1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["startTime"], json!("2023-11-14T22:13:20.000Z"));
        assert_eq!(value["steps"][0]["type"], json!("search"));
        assert!(value.get("metadata").is_none());
        assert!(raw.contains('\n'));
    }

    #[test]
    fn test_get_missing_and_invalid_ids() {
        let (_dir, store) = temp_store();
        assert!(store.get("missing").unwrap().is_none());
        assert!(store.get("../etc/passwd").unwrap().is_none());
        assert!(!store.delete("../etc/passwd").unwrap());

        for id in ["../escape", "", ".", "..", ".hidden", "a/b", "a\\b", "a\nb", "a:b"] {
            let mut trace = sample_trace("ok", 0);
            trace.id = id.to_string();
            assert!(
                matches!(store.save(&trace), Err(StoreError::InvalidId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_dotted_ids_round_trip() {
        let (_dir, store) = temp_store();
        let mut trace = sample_trace("ok", 0);
        trace.id = "order.42".to_string();
        store.save(&trace).unwrap();

        assert!(store.dir().join("order.42.json").exists());
        assert_eq!(store.get("order.42").unwrap(), Some(trace));
        assert_eq!(store.list().unwrap()[0].id, "order.42");
        assert!(store.delete("order.42").unwrap());
    }

    #[test]
    fn test_get_corrupt_record_is_an_error() {
        let (_dir, store) = temp_store();
        store.save(&sample_trace("good", 0)).unwrap();
        fs::write(store.dir().join("bad.json"), b"{\"id\": \"bad\", trunc").unwrap();

        assert!(matches!(store.get("bad"), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_list_sorts_newest_first_and_skips_corrupt() {
        let (_dir, store) = temp_store();
        store.save(&sample_trace("t1", 1)).unwrap();
        store.save(&sample_trace("t3", 3)).unwrap();
        store.save(&sample_trace("t2", 2)).unwrap();
        fs::write(store.dir().join("broken.json"), b"not json").unwrap();
        fs::write(store.dir().join("notes.txt"), b"ignored").unwrap();
        fs::write(store.dir().join(".t9.abc.tmp"), b"{").unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["t3", "t2", "t1"]);
    }

    #[test]
    fn test_list_tie_break_is_stable() {
        let (_dir, store) = temp_store();
        store.save(&sample_trace("b", 5)).unwrap();
        store.save(&sample_trace("a", 5)).unwrap();
        store.save(&sample_trace("c", 5)).unwrap();

        let first: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        let second: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_list_empty_store() {
        let (_dir, store) = temp_store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = temp_store();
        store.save(&sample_trace("trace-1", 0)).unwrap();
        store.save(&sample_trace("trace-2", 0)).unwrap();

        assert!(store.delete("trace-1").unwrap());
        let after_first = store.list().unwrap();
        assert!(!store.delete("trace-1").unwrap());
        assert_eq!(store.list().unwrap(), after_first);
        assert_eq!(after_first.len(), 1);
    }

    #[test]
    fn test_clear_removes_records_only() {
        let (_dir, store) = temp_store();
        assert_eq!(store.clear().unwrap(), 0);

        store.save(&sample_trace("t1", 1)).unwrap();
        store.save(&sample_trace("t2", 2)).unwrap();
        fs::write(store.dir().join("keep.txt"), b"x").unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
        assert!(store.dir().join("keep.txt").exists());
    }

    #[test]
    fn test_update_rewrites_file() {
        let (_dir, store) = temp_store();
        store.save(&sample_trace("trace-1", 0)).unwrap();

        let updated = store
            .update("trace-1", json!({"status": "failed"}).into_data())
            .unwrap();
        assert_eq!(updated.status, TraceStatus::Failed);
        assert_eq!(store.get("trace-1").unwrap().unwrap().status, TraceStatus::Failed);
    }

    #[test]
    fn test_concurrent_saves_never_corrupt() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        store.save(&sample_trace("shared", 0)).unwrap();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..10 {
                        let mut trace = sample_trace("shared", 0);
                        trace.name = format!("writer {i} round {round}");
                        store.save(&trace).unwrap();
                        store.save(&sample_trace(&format!("own-{i}-{round}"), i)).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..20 {
                    let trace = store.get("shared").unwrap().unwrap();
                    assert!(trace.name.starts_with("writer") || trace.name == "Trace shared");
                    store.list().unwrap();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(store.list().unwrap().len(), 81);
        let leftovers = fs::read_dir(store.dir())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_EXT))
            .count();
        assert_eq!(leftovers, 0);
    }
}
