use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Lexically normalizes a path for comparison only: drops `.` segments,
/// folds `..` into its parent and ignores trailing separators. Case is
/// folded on Windows. Stored paths are never rewritten with this.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // "/.." is "/"
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    #[cfg(windows)]
    {
        out = PathBuf::from(out.to_string_lossy().to_lowercase());
    }

    out
}

pub fn same_path(a: &Path, b: &Path) -> bool {
    normalize_path(a) == normalize_path(b)
}

/// One completed relocation. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    #[serde(rename = "original")]
    pub original_path: PathBuf,
    #[serde(rename = "destination")]
    pub current_path: PathBuf,
}

impl MoveRecord {
    pub fn new(original: impl Into<PathBuf>, current: impl Into<PathBuf>) -> Self {
        Self { original_path: original.into(), current_path: current.into() }
    }
}

// Older history files hold bare `[original, destination]` pairs.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Pair(PathBuf, PathBuf),
    Object { original: PathBuf, destination: PathBuf },
}

impl<'de> Deserialize<'de> for MoveRecord {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match StoredRecord::deserialize(deserializer)? {
            StoredRecord::Pair(original, destination) => MoveRecord::new(original, destination),
            StoredRecord::Object { original, destination } => MoveRecord::new(original, destination),
        })
    }
}

/// Chronological log of moves; the only authority on where a file lives now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    records: Vec<MoveRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from stored records, keeping their order as-is.
    pub fn from_records(records: Vec<MoveRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[MoveRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a move, dropping any earlier record for the same original.
    pub fn record_move(&mut self, original: impl Into<PathBuf>, destination: impl Into<PathBuf>) {
        let record = MoveRecord::new(original, destination);
        let key = normalize_path(&record.original_path);
        let before = self.records.len();
        self.records.retain(|r| normalize_path(&r.original_path) != key);
        debug!(
            original = %record.original_path.display(),
            destination = %record.current_path.display(),
            superseded = before - self.records.len(),
            "ledger: record move"
        );
        self.records.push(record);
    }

    pub fn last(&self) -> Option<&MoveRecord> {
        self.records.last()
    }

    pub fn undo_last(&mut self) -> Option<MoveRecord> {
        let popped = self.records.pop();
        if let Some(r) = &popped {
            debug!(original = %r.original_path.display(), "ledger: undo last");
        }
        popped
    }

    /// Newest-to-oldest lookup by original identity or by a location the
    /// file was already moved to.
    pub fn record_for(&self, path: &Path) -> Option<&MoveRecord> {
        let key = normalize_path(path);
        self.records.iter().rev().find(|r| {
            normalize_path(&r.original_path) == key || normalize_path(&r.current_path) == key
        })
    }

    pub fn resolve(&self, path: &Path) -> Option<&Path> {
        self.record_for(path).map(|r| r.current_path.as_path())
    }

    /// Removes duplicate originals, keeping the newest record of each and
    /// the relative order of the survivors. Returns how many were dropped.
    pub fn validate(&mut self) -> usize {
        let before = self.records.len();
        let mut seen = HashSet::new();
        let mut kept: Vec<MoveRecord> = self
            .records
            .drain(..)
            .rev()
            .filter(|r| seen.insert(normalize_path(&r.original_path)))
            .collect();
        kept.reverse();
        self.records = kept;

        let dropped = before - self.records.len();
        if dropped > 0 {
            debug!(dropped, "ledger: removed duplicate records");
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// JSON file holding the ordered ledger.
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means an empty ledger.
    pub fn load(&self) -> Result<Ledger, ConfigError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no history file, starting empty");
            return Ok(Ledger::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| ConfigError::io(&self.path, e))?;
        let records: Vec<MoveRecord> = serde_json::from_str(&content)?;
        info!(path = %self.path.display(), records = records.len(), "loaded history");
        Ok(Ledger::from_records(records))
    }

    /// Renames the file to `<name>.bak`, replacing an older backup, and
    /// returns the backup path. The next save starts a fresh file.
    pub fn set_aside(&self) -> Result<PathBuf, ConfigError> {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".bak");
        let backup = self.path.with_file_name(name);
        fs::rename(&self.path, &backup).map_err(|e| ConfigError::io(&self.path, e))?;
        info!(path = %self.path.display(), backup = %backup.display(), "history set aside");
        Ok(backup)
    }

    pub fn save(&self, ledger: &Ledger) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(ledger.records())?;
        fs::write(&self.path, json).map_err(|e| ConfigError::io(&self.path, e))?;
        debug!(path = %self.path.display(), records = ledger.len(), "history saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_move_then_move_again_keeps_one_record() {
        let mut ledger = Ledger::new();
        ledger.record_move("a.png", "/dest1/a.png");
        assert_eq!(ledger.resolve(&p("a.png")), Some(Path::new("/dest1/a.png")));

        ledger.record_move("a.png", "/dest2/a.png");
        assert_eq!(ledger.resolve(&p("a.png")), Some(Path::new("/dest2/a.png")));
        let count = ledger.records().iter().filter(|r| r.original_path == p("a.png")).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_undo_returns_record_and_clears_resolution() {
        let mut ledger = Ledger::new();
        ledger.record_move("a.png", "/dest1/a.png");
        let undone = ledger.undo_last();
        assert_eq!(undone, Some(MoveRecord::new("a.png", "/dest1/a.png")));
        assert_eq!(ledger.resolve(&p("a.png")), None);
        assert_eq!(ledger.undo_last(), None);
    }

    #[test]
    fn test_undo_is_left_inverse_of_move() {
        let mut ledger = Ledger::new();
        ledger.record_move("x.jpg", "/k/x.jpg");
        ledger.record_move("y.jpg", "/k/y.jpg");
        let before = ledger.clone();

        ledger.record_move("z.jpg", "/d/z.jpg");
        ledger.undo_last();
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_resolve_matches_last_record_per_original() {
        let mut ledger = Ledger::new();
        let moves = [
            ("a.png", "/1/a.png"),
            ("b.png", "/1/b.png"),
            ("a.png", "/2/a.png"),
            ("c.png", "/3/c.png"),
            ("b.png", "/3/b.png"),
        ];
        for (o, d) in moves {
            ledger.record_move(o, d);
        }
        assert_eq!(ledger.resolve(&p("a.png")), Some(Path::new("/2/a.png")));
        assert_eq!(ledger.resolve(&p("b.png")), Some(Path::new("/3/b.png")));
        assert_eq!(ledger.resolve(&p("c.png")), Some(Path::new("/3/c.png")));
        assert_eq!(ledger.resolve(&p("never.png")), None);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_resolve_by_current_location() {
        let mut ledger = Ledger::new();
        ledger.record_move("/src/a.png", "/dest1/a.png");
        assert_eq!(ledger.resolve(&p("/dest1/a.png")), Some(Path::new("/dest1/a.png")));
        // Comparison is normalized, storage is not.
        assert_eq!(ledger.resolve(&p("/src/./sub/../a.png")), Some(Path::new("/dest1/a.png")));
        assert_eq!(ledger.records()[0].original_path, p("/src/a.png"));
    }

    #[test]
    fn test_validate_keeps_newest_and_is_idempotent() {
        let mut ledger = Ledger::from_records(vec![
            MoveRecord::new("a", "/1/a"),
            MoveRecord::new("b", "/1/b"),
            MoveRecord::new("a", "/2/a"),
            MoveRecord::new("c", "/1/c"),
        ]);
        let dropped = ledger.validate();
        assert_eq!(dropped, 1);
        assert_eq!(
            ledger.records(),
            &[MoveRecord::new("b", "/1/b"), MoveRecord::new("a", "/2/a"), MoveRecord::new("c", "/1/c")]
        );

        let once = ledger.clone();
        assert_eq!(ledger.validate(), 0);
        assert_eq!(ledger, once);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c/")), p("/a/c"));
        assert_eq!(normalize_path(Path::new("../x")), p("../x"));
        assert_eq!(normalize_path(Path::new("/..")), p("/"));
        assert!(same_path(Path::new("out/A"), Path::new("./out/A/")));
    }

    #[test]
    fn test_history_store_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("nested").join("history.json"));
        assert!(store.load().unwrap().is_empty());

        let mut ledger = Ledger::new();
        ledger.record_move("z.png", "/out/B/z.png");
        ledger.record_move("a.png", "/out/A/a.png");
        ledger.record_move("./m.png", "/out/C/m.png");
        store.save(&ledger).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(loaded.records()[2].original_path, p("./m.png"));
    }

    #[test]
    fn test_history_store_reads_pair_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"[["a.png", "/out/A/a.png"], {"original": "b.png", "destination": "/out/B/b.png"}]"#).unwrap();

        let ledger = HistoryStore::new(&path).load().unwrap();
        assert_eq!(
            ledger.records(),
            &[MoveRecord::new("a.png", "/out/A/a.png"), MoveRecord::new("b.png", "/out/B/b.png")]
        );
    }

    #[test]
    fn test_history_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "not json").unwrap();
        let store = HistoryStore::new(&path);
        assert!(matches!(store.load(), Err(ConfigError::History(_))));

        let backup = store.set_aside().unwrap();
        assert_eq!(backup, dir.path().join("history.json.bak"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "not json");
        assert!(store.load().unwrap().is_empty());
    }
}
