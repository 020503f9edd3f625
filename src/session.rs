use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, debug_span, info, warn};

use crate::config::{ConfigStore, HexColor, Settings, ThemeField, ThemeMode};
use crate::cursor::{Cursor, next_valid_index};
use crate::error::{ConfigError, SortError};
use crate::fileops::{DiskFs, FileSystem};
use crate::ledger::{Ledger, normalize_path, same_path};
use crate::resolver::effective_path;
use crate::scanner::ImportResult;
use crate::view::{ExtensionFilter, FilteredView};

#[derive(Debug, Clone, PartialEq)]
pub enum InputIntent {
    Next,
    Prev,
    Skip,
    /// 1-based destination slot.
    MoveTo(usize),
    Undo,
    CycleFilter,
    SetFilter(String),
    CycleTheme,
    ExportLog(PathBuf),
    Reset,
    Cancel,
    Quit,
}

/// The relocation in flight, recorded on the span around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Moving,
    Undoing,
}

/// What the front-end shows for the selected entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    pub path: PathBuf,
    pub moved_to: Option<String>,
    /// 1-based.
    pub position: usize,
    pub total: usize,
    pub next: Option<PathBuf>,
}

/// Outcome of an operation that already took effect in memory (and on
/// disk, for moves) before its state was written out. `save_error` is set
/// when that write failed.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub save_error: Option<ConfigError>,
}

impl<T> Committed<T> {
    fn new(value: T, saved: Result<(), ConfigError>) -> Self {
        Self { value, save_error: saved.err() }
    }

    /// Status line for `msg`, turned into an error notice when the save failed.
    pub fn notice(&self, msg: impl Into<String>) -> (String, bool) {
        let msg = msg.into();
        match &self.save_error {
            Some(e) => (format!("{}, but the change could not be saved: {}", msg.trim_end_matches('.'), e), true),
            None => (msg, false),
        }
    }

    pub fn into_result(self) -> Result<T, ConfigError> {
        match self.save_error {
            Some(e) => Err(e),
            None => Ok(self.value),
        }
    }
}

// --- Session ---

/// Everything one triage run mutates: the ledger, the scanned list, the
/// filtered view and the cursor. All operations go through here, one at
/// a time.
pub struct Session<F: FileSystem = DiskFs> {
    fs: F,
    config: Option<ConfigStore>,
    pub settings: Settings,
    ledger: Ledger,
    files: Vec<PathBuf>,
    view: FilteredView,
    cursor: Cursor,
    source_folder: Option<PathBuf>,
    import_cache: HashMap<PathBuf, Vec<PathBuf>>,
    activity: Vec<String>,
    pub status_message: Option<(String, bool)>,
    pub exit_requested: bool,
    pub selection_changed: bool,
}

impl Session<DiskFs> {
    /// Loads settings and history from `config` and works on the real disk.
    /// An unreadable history file is renamed aside and the run starts with
    /// an empty ledger and an error notice.
    pub fn open(config: ConfigStore) -> Result<Self, ConfigError> {
        let settings = config.load()?;
        let store = config.history_store();
        let (ledger, notice) = match store.load() {
            Ok(ledger) => (ledger, None),
            Err(ConfigError::History(e)) => {
                let backup = store.set_aside()?;
                warn!(path = %store.path().display(), backup = %backup.display(), "unreadable history set aside: {}", e);
                let msg = format!("History file was unreadable and has been moved to {}.", backup.display());
                (Ledger::new(), Some(msg))
            }
            Err(e) => return Err(e),
        };

        let mut session = Self::new(DiskFs, settings, ledger, Some(config));
        if let Some(msg) = notice {
            session.set_status(msg, true);
        }
        Ok(session)
    }
}

impl<F: FileSystem> Session<F> {
    /// Without a `config` nothing is persisted.
    pub fn new(fs: F, settings: Settings, mut ledger: Ledger, config: Option<ConfigStore>) -> Self {
        let dropped = ledger.validate();
        let mut session = Self {
            fs,
            config,
            settings,
            ledger,
            files: Vec::new(),
            view: FilteredView::default(),
            cursor: Cursor::default(),
            source_folder: None,
            import_cache: HashMap::new(),
            activity: Vec::new(),
            status_message: None,
            exit_requested: false,
            selection_changed: true,
        };
        if dropped > 0 {
            info!(dropped, "dropped superseded history records");
            if let Err(e) = session.persist() {
                session.set_status(format!("Could not save the cleaned-up history: {}", e), true);
            }
        }
        session
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn view(&self) -> &FilteredView {
        &self.view
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn source_folder(&self) -> Option<&Path> {
        self.source_folder.as_deref()
    }

    pub fn activity(&self) -> &[String] {
        &self.activity
    }

    // --- Import ---

    /// The single handback point for a background scan. The value is the
    /// number of files loaded.
    pub fn finish_import(&mut self, result: ImportResult) -> Committed<usize> {
        let ImportResult { folder, files } = result;
        self.import_cache.insert(normalize_path(&folder), files.clone());
        self.load_files(&folder, files);
        self.settings.add_recent_folder(&folder);
        info!(folder = %folder.display(), files = self.files.len(), visible = self.view.len(), "folder imported");
        Committed::new(self.files.len(), self.persist_settings())
    }

    /// Reuses a scan from earlier in this run. `None` when `folder` was
    /// never imported.
    pub fn import_cached(&mut self, folder: &Path) -> Option<Committed<usize>> {
        let files = self.import_cache.get(&normalize_path(folder)).cloned()?;
        debug!(folder = %folder.display(), files = files.len(), "using cached import");
        self.load_files(folder, files);
        self.settings.add_recent_folder(folder);
        Some(Committed::new(self.files.len(), self.persist_settings()))
    }

    fn load_files(&mut self, folder: &Path, files: Vec<PathBuf>) {
        self.source_folder = Some(folder.to_path_buf());
        self.files = files;
        let filter = self.view.filter().clone();
        self.cursor.reset(0);
        let idx = self.view.refilter(&self.files, filter, None, &self.fs, &self.ledger);
        self.cursor.set(idx);
        self.selection_changed = true;
    }

    // --- Filter ---

    pub fn set_filter(&mut self, filter: ExtensionFilter) {
        let selected = self.current().map(Path::to_path_buf);
        self.cursor.reset(0);
        let idx = self.view.refilter(&self.files, filter, selected.as_deref(), &self.fs, &self.ledger);
        self.cursor.set(idx);
        self.selection_changed = true;
    }

    pub fn cycle_filter(&mut self) {
        let next = self.view.filter().cycle();
        self.set_filter(next);
    }

    // --- Selection ---

    /// Scanned path of the selected entry.
    pub fn current(&self) -> Option<&Path> {
        self.cursor.index().and_then(|i| self.view.get(i))
    }

    pub fn display_info(&self) -> Option<DisplayInfo> {
        let index = self.cursor.index()?;
        let original = self.view.get(index)?;
        let moved_to = self
            .ledger
            .resolve(original)
            .and_then(Path::parent)
            .map(|folder| self.folder_label(folder));
        let next = next_valid_index(index, self.view.entries(), &self.fs, &self.ledger)
            .and_then(|i| self.view.get(i))
            .map(|p| effective_path(&self.ledger, p));

        Some(DisplayInfo {
            path: effective_path(&self.ledger, original),
            moved_to,
            position: index + 1,
            total: self.view.len(),
            next,
        })
    }

    /// Name of the slot containing `folder`, else the folder's own name.
    pub fn folder_label(&self, folder: &Path) -> String {
        let folder_norm = normalize_path(folder);
        self.settings
            .folders
            .iter()
            .find(|slot| folder_norm.starts_with(normalize_path(&slot.path)))
            .map(|slot| slot.name.clone())
            .unwrap_or_else(|| {
                folder
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| folder.display().to_string())
            })
    }

    // --- Navigation ---

    pub fn advance(&mut self) -> bool {
        let moved = self.cursor.advance(self.view.entries(), &self.fs, &self.ledger).is_some();
        if !moved {
            self.set_status("No valid next image.", false);
        }
        moved
    }

    pub fn retreat(&mut self) -> bool {
        let moved = self.cursor.retreat(self.view.entries(), &self.fs, &self.ledger).is_some();
        if !moved {
            self.set_status("No valid previous image.", false);
        }
        moved
    }

    pub fn skip(&mut self) -> bool {
        let moved = self.cursor.skip(self.view.entries(), &self.fs, &self.ledger).is_some();
        if !moved {
            self.set_status("No valid next image.", false);
        }
        moved
    }

    // --- Move / Undo ---

    /// Moves the selection into destination slot `slot` (1-based). The
    /// value is the label of where it landed.
    pub fn move_to_slot(&mut self, slot: usize) -> Result<Committed<String>, SortError> {
        let dest = slot
            .checked_sub(1)
            .and_then(|i| self.settings.folders.get(i))
            .ok_or(SortError::UnknownSlot(slot))?;
        if dest.is_placeholder() {
            return Err(SortError::DestinationNotConfigured(slot));
        }
        let folder = dest.path.clone();
        self.move_current_to(&folder)
    }

    /// Relocates the selected file into `dest_folder`. The ledger only
    /// changes after the file is physically there.
    pub fn move_current_to(&mut self, dest_folder: &Path) -> Result<Committed<String>, SortError> {
        let pre = self.cursor.index().ok_or(SortError::NoSelection)?;
        let original = self.view.get(pre).ok_or(SortError::NoSelection)?.to_path_buf();
        let source = effective_path(&self.ledger, &original);

        if source.parent().is_some_and(|p| same_path(p, dest_folder)) {
            return Err(SortError::AlreadyAtDestination(self.folder_label(dest_folder)));
        }
        if !self.fs.exists(&source) {
            return Err(SortError::SourceNotFound(source));
        }
        let name = original.file_name().ok_or_else(|| SortError::SourceNotFound(original.clone()))?;
        let target = dest_folder.join(name);
        // The history file stores paths as strings.
        if let Some(bad) = [&original, &target].into_iter().find(|p| p.to_str().is_none()) {
            return Err(SortError::UnsupportedPath(bad.clone()));
        }

        let landed = self.transfer(Phase::Moving, &source, &target).map_err(|e| {
            warn!(path = %source.display(), "move failed: {}", e);
            SortError::MoveIoFailure { path: source.clone(), source: e }
        })?;

        self.ledger.record_move(original, landed.clone());
        let saved = self.persist();
        self.log_activity(format!("Moved: {} -> {}", source.display(), landed.display()));
        info!(from = %source.display(), to = %landed.display(), "moved");

        let len = self.view.len();
        self.cursor.push_history(pre);
        let next = next_valid_index(pre, self.view.entries(), &self.fs, &self.ledger).unwrap_or(pre.min(len - 1));
        self.cursor.set(Some(next));
        self.cursor.prune_history(len);
        self.selection_changed = true;

        Ok(Committed::new(self.folder_label(dest_folder), saved))
    }

    /// Puts the most recently moved file back and selects it. The value is
    /// its restored path.
    pub fn undo(&mut self) -> Result<Committed<PathBuf>, SortError> {
        let record = self.ledger.last().cloned().ok_or(SortError::NothingToUndo)?;

        self.transfer(Phase::Undoing, &record.current_path, &record.original_path)
            .map_err(|e| {
                warn!(path = %record.current_path.display(), "undo failed: {}", e);
                SortError::UndoIoFailure { path: record.current_path.clone(), source: e }
            })?;

        self.ledger.undo_last();
        self.ledger.validate();
        let saved = self.persist();
        self.log_activity(format!(
            "Undo: {} -> {}",
            record.current_path.display(),
            record.original_path.display()
        ));
        info!(path = %record.original_path.display(), "restored");

        self.view.rebuild(&self.files);
        match self.view.position_of(&record.original_path) {
            Some(i) => self.cursor.set(Some(i)),
            None => self.cursor.clamp(self.view.len()),
        }
        self.cursor.prune_history(self.view.len());
        self.selection_changed = true;

        Ok(Committed::new(record.original_path, saved))
    }

    fn transfer(&self, phase: Phase, from: &Path, to: &Path) -> io::Result<PathBuf> {
        let _span = debug_span!("transfer", ?phase).entered();
        debug!(from = %from.display(), to = %to.display(), "relocating");
        self.fs.relocate(from, to)
    }

    // --- Activity log ---

    fn log_activity(&mut self, entry: String) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.activity.push(format!("[{}] {}", stamp, entry));
    }

    pub fn export_log(&self, target: &Path) -> Result<usize, SortError> {
        if self.activity.is_empty() {
            return Err(SortError::NothingToExport);
        }
        let mut content = self.activity.join("\n");
        content.push('\n');
        fs::write(target, content).map_err(SortError::ExportFailed)?;
        info!(path = %target.display(), lines = self.activity.len(), "activity log exported");
        Ok(self.activity.len())
    }

    // --- Settings ---

    /// Relative paths are resolved against the working directory before
    /// they are stored.
    pub fn set_folder(&mut self, slot: usize, name: &str, path: &Path) -> Result<Committed<()>, SortError> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.settings.set_folder(slot, name, &path)?;
        Ok(Committed::new((), self.persist_settings()))
    }

    pub fn set_theme_mode(&mut self, mode: ThemeMode) -> Committed<()> {
        self.settings.theme_mode = mode;
        Committed::new((), self.persist_settings())
    }

    pub fn cycle_theme_mode(&mut self) -> Committed<ThemeMode> {
        let mode = self.settings.theme_mode.cycle();
        self.settings.theme_mode = mode;
        Committed::new(mode, self.persist_settings())
    }

    /// Changes one color of the custom theme and switches to it.
    pub fn set_theme_color(&mut self, field: ThemeField, color: HexColor) -> Committed<()> {
        self.settings.custom_theme.set(field, color);
        self.settings.theme_mode = ThemeMode::Custom;
        Committed::new((), self.persist_settings())
    }

    pub fn reset_theme(&mut self) -> Committed<()> {
        self.settings.custom_theme.reset_to_defaults();
        Committed::new((), self.persist_settings())
    }

    pub fn clear_recent_folders(&mut self) -> Committed<()> {
        self.settings.clear_recent_folders();
        Committed::new((), self.persist_settings())
    }

    /// Stock settings, empty history, nothing loaded.
    pub fn reset(&mut self) -> Committed<()> {
        self.settings = Settings::default();
        self.ledger.clear();
        let saved = self.persist_settings().and(self.persist());
        self.files.clear();
        self.view.clear();
        self.cursor.reset(0);
        self.import_cache.clear();
        self.source_folder = None;
        self.selection_changed = true;
        info!("reset to defaults");
        Committed::new((), saved)
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        config
            .history_store()
            .save(&self.ledger)
            .inspect_err(|e| warn!("failed to save history: {}", e))
    }

    fn persist_settings(&self) -> Result<(), ConfigError> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        config.save(&self.settings).inspect_err(|e| warn!("failed to save settings: {}", e))
    }

    // --- Input ---

    fn set_status(&mut self, msg: impl Into<String>, is_error: bool) {
        self.status_message = Some((msg.into(), is_error));
    }

    fn report(&mut self, err: SortError) {
        debug!("notice: {}", err);
        let is_error = !matches!(err, SortError::AlreadyAtDestination(_) | SortError::NothingToUndo);
        self.set_status(err.to_string(), is_error);
    }

    pub fn handle_input(&mut self, intent: InputIntent) {
        self.selection_changed = false;

        match intent {
            InputIntent::Quit => self.exit_requested = true,
            InputIntent::Cancel => self.status_message = None,
            InputIntent::Next => self.selection_changed = self.advance(),
            InputIntent::Prev => self.selection_changed = self.retreat(),
            InputIntent::Skip => self.selection_changed = self.skip(),
            InputIntent::MoveTo(slot) => match self.move_to_slot(slot) {
                Ok(done) => {
                    self.status_message = Some(done.notice(format!("Image successfully moved to {}", done.value)));
                }
                Err(SortError::SourceNotFound(path)) => {
                    self.report(SortError::SourceNotFound(path));
                    // Vanished files are skipped over rather than left selected.
                    if self.cursor.advance(self.view.entries(), &self.fs, &self.ledger).is_some() {
                        self.selection_changed = true;
                    }
                }
                Err(e) => self.report(e),
            },
            InputIntent::Undo => match self.undo() {
                Ok(done) => {
                    let name = done.value.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                    let msg = format!("\"{}\" has been restored to its original location.", name);
                    self.status_message = Some(done.notice(msg));
                }
                Err(e) => self.report(e),
            },
            InputIntent::CycleFilter => {
                self.cycle_filter();
                let label = self.view.filter().to_string();
                self.set_status(format!("Filter: {}", label), false);
            }
            InputIntent::SetFilter(token) => match token.parse::<ExtensionFilter>() {
                Ok(filter) => self.set_filter(filter),
                Err(e) => self.report(e),
            },
            InputIntent::CycleTheme => {
                let done = self.cycle_theme_mode();
                self.status_message = Some(done.notice(format!("Theme: {}", done.value)));
            }
            InputIntent::ExportLog(path) => match self.export_log(&path) {
                Ok(_) => self.set_status(format!("Log exported to {}", path.display()), false),
                Err(e) => self.report(e),
            },
            InputIntent::Reset => {
                let done = self.reset();
                self.status_message = Some(done.notice("Settings reset to defaults."));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileops::mem::MemFs;
    use crate::resolver::is_present;

    #[cfg(unix)]
    use std::ffi::OsStr;
    #[cfg(unix)]
    use std::os::unix::ffi::OsStrExt;

    fn session(names: &[&str]) -> Session<MemFs> {
        let files: Vec<PathBuf> = names.iter().map(|n| PathBuf::from(format!("/in/{}", n))).collect();
        let fs = MemFs::with_files(files.iter());
        let mut settings = Settings::default();
        settings.set_folder(1, "Keep", Path::new("/out/keep")).unwrap();
        settings.set_folder(2, "Trash", Path::new("/out/trash")).unwrap();
        let mut s = Session::new(fs, settings, Ledger::new(), None);
        s.finish_import(ImportResult { folder: PathBuf::from("/in"), files });
        s
    }

    fn stored_session(config: ConfigStore, files: Vec<PathBuf>) -> Session<MemFs> {
        let mut settings = Settings::default();
        settings.set_folder(1, "Keep", Path::new("/out/keep")).unwrap();
        settings.set_folder(2, "Trash", Path::new("/out/trash")).unwrap();
        let mut s = Session::new(MemFs::with_files(files.iter()), settings, Ledger::new(), Some(config));
        s.finish_import(ImportResult { folder: PathBuf::from("/in"), files });
        s
    }

    // A config directory that cannot be created, so every save fails.
    fn unwritable_config(dir: &Path) -> ConfigStore {
        let blocker = dir.join("blocker");
        fs::write(&blocker, b"").unwrap();
        ConfigStore::new(blocker.join("cfg"))
    }

    #[test]
    fn test_move_records_and_advances() {
        let mut s = session(&["a.png", "b.png", "c.png"]);
        s.handle_input(InputIntent::MoveTo(1));

        assert_eq!(s.status_message, Some(("Image successfully moved to Keep".to_string(), false)));
        assert_eq!(s.ledger().resolve(Path::new("/in/a.png")), Some(Path::new("/out/keep/a.png")));
        assert_eq!(s.cursor().index(), Some(1));
        assert_eq!(s.cursor().history(), &[0]);
        assert!(s.fs().exists(Path::new("/out/keep/a.png")));
        assert_eq!(s.activity().len(), 1);
        assert!(s.activity()[0].ends_with("Moved: /in/a.png -> /out/keep/a.png"));
    }

    #[test]
    fn test_move_last_entry_stays_put() {
        let mut s = session(&["a.png"]);
        s.move_to_slot(1).unwrap();
        assert_eq!(s.cursor().index(), Some(0));
        let info = s.display_info().unwrap();
        assert_eq!(info.path, PathBuf::from("/out/keep/a.png"));
        assert_eq!(info.moved_to.as_deref(), Some("Keep"));
    }

    #[test]
    fn test_failed_move_leaves_ledger() {
        let mut s = session(&["a.png", "b.png"]);
        s.fs().set_fail_moves(true);
        let err = s.move_to_slot(1).unwrap_err();
        assert!(matches!(err, SortError::MoveIoFailure { .. }));
        assert!(s.ledger().is_empty());
        assert_eq!(s.cursor().index(), Some(0));
    }

    #[test]
    fn test_move_again_to_same_folder_is_refused() {
        let mut s = session(&["a.png"]);
        s.move_to_slot(2).unwrap();
        let err = s.move_to_slot(2).unwrap_err();
        assert!(matches!(err, SortError::AlreadyAtDestination(ref l) if l == "Trash"));
        assert_eq!(s.ledger().len(), 1);

        // Re-moving elsewhere replaces the record.
        s.move_to_slot(1).unwrap();
        assert_eq!(s.ledger().len(), 1);
        assert_eq!(s.ledger().resolve(Path::new("/in/a.png")), Some(Path::new("/out/keep/a.png")));
    }

    #[test]
    fn test_placeholder_and_unknown_slots() {
        let mut s = session(&["a.png"]);
        assert!(matches!(s.move_to_slot(3), Err(SortError::DestinationNotConfigured(3))));
        assert!(matches!(s.move_to_slot(9), Err(SortError::UnknownSlot(9))));
        assert!(s.ledger().is_empty());
    }

    #[test]
    fn test_vanished_source_skips_ahead() {
        let mut s = session(&["a.png", "b.png"]);
        s.fs().remove(Path::new("/in/a.png"));
        s.handle_input(InputIntent::MoveTo(1));
        let (msg, is_error) = s.status_message.clone().unwrap();
        assert!(msg.starts_with("Source file not found"));
        assert!(is_error);
        assert_eq!(s.cursor().index(), Some(1));
        assert!(s.ledger().is_empty());
    }

    #[test]
    fn test_undo_restores_and_selects() {
        let mut s = session(&["a.png", "b.png", "c.png"]);
        s.move_to_slot(1).unwrap();
        s.move_to_slot(2).unwrap();
        assert_eq!(s.cursor().index(), Some(2));

        s.handle_input(InputIntent::Undo);
        assert_eq!(
            s.status_message,
            Some(("\"b.png\" has been restored to its original location.".to_string(), false))
        );
        assert_eq!(s.cursor().index(), Some(1));
        assert!(s.fs().exists(Path::new("/in/b.png")));
        assert_eq!(s.ledger().len(), 1);
        assert_eq!(s.activity().len(), 3);
    }

    #[test]
    fn test_failed_undo_keeps_record() {
        let mut s = session(&["a.png"]);
        s.move_to_slot(1).unwrap();
        s.fs().set_fail_moves(true);
        assert!(matches!(s.undo(), Err(SortError::UndoIoFailure { .. })));
        assert_eq!(s.ledger().len(), 1);
        assert_eq!(s.ledger().resolve(Path::new("/in/a.png")), Some(Path::new("/out/keep/a.png")));
    }

    #[test]
    fn test_undo_with_empty_ledger() {
        let mut s = session(&["a.png"]);
        s.handle_input(InputIntent::Undo);
        assert_eq!(s.status_message, Some(("No action to undo.".to_string(), false)));
    }

    #[test]
    fn test_navigation_notices() {
        let mut s = session(&["a.png", "b.png"]);
        s.handle_input(InputIntent::Prev);
        assert_eq!(s.status_message, Some(("No valid previous image.".to_string(), false)));
        assert!(!s.selection_changed);

        s.handle_input(InputIntent::Next);
        assert!(s.selection_changed);
        s.handle_input(InputIntent::Next);
        assert_eq!(s.status_message, Some(("No valid next image.".to_string(), false)));
        assert_eq!(s.cursor().index(), Some(1));
    }

    #[test]
    fn test_filter_change_keeps_selection() {
        let mut s = session(&["a.png", "b.jpg", "c.png"]);
        s.advance();
        s.advance();
        s.handle_input(InputIntent::SetFilter("png".into()));
        assert_eq!(s.view().len(), 2);
        assert_eq!(s.current(), Some(Path::new("/in/c.png")));

        s.handle_input(InputIntent::SetFilter("docx".into()));
        assert!(s.status_message.as_ref().is_some_and(|(_, err)| *err));
        assert_eq!(s.view().filter(), &ExtensionFilter::Only("png".into()));
    }

    #[test]
    fn test_display_info_preview() {
        let mut s = session(&["a.png", "b.png", "c.png"]);
        s.fs().remove(Path::new("/in/b.png"));
        let info = s.display_info().unwrap();
        assert_eq!(info.position, 1);
        assert_eq!(info.total, 3);
        assert_eq!(info.moved_to, None);
        assert_eq!(info.next, Some(PathBuf::from("/in/c.png")));
    }

    #[test]
    fn test_folder_label_prefers_slot_name() {
        let s = session(&[]);
        assert_eq!(s.folder_label(Path::new("/out/keep/2024")), "Keep");
        assert_eq!(s.folder_label(Path::new("/elsewhere/misc")), "misc");
    }

    #[test]
    fn test_import_cache_resets_cursor() {
        let mut s = session(&["a.png", "b.png"]);
        s.advance();
        assert!(s.import_cached(Path::new("/in/")).is_some());
        assert_eq!(s.cursor().index(), Some(0));
        assert!(s.cursor().history().is_empty());
        assert!(s.import_cached(Path::new("/other")).is_none());
        assert_eq!(s.settings.recent_folders[0], PathBuf::from("/in/"));
    }

    #[test]
    fn test_export_log() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("log.txt");
        let mut s = session(&["a.png"]);
        assert!(matches!(s.export_log(&target), Err(SortError::NothingToExport)));

        s.move_to_slot(1).unwrap();
        s.undo().unwrap();
        assert_eq!(s.export_log(&target).unwrap(), 2);
        let content = fs::read_to_string(&target).unwrap();
        assert!(content.contains("Moved: /in/a.png -> /out/keep/a.png"));
        assert!(content.contains("Undo: /out/keep/a.png -> /in/a.png"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut s = session(&["a.png"]);
        s.move_to_slot(1).unwrap();
        s.handle_input(InputIntent::Reset);
        assert!(s.ledger().is_empty());
        assert!(s.view().is_empty());
        assert_eq!(s.cursor().index(), None);
        assert!(s.settings.folders.iter().all(|f| f.is_placeholder()));
        assert!(s.display_info().is_none());
    }

    #[test]
    fn test_session_persists_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stored_session(ConfigStore::new(dir.path()), vec![PathBuf::from("/in/a.png")]);
        s.handle_input(InputIntent::MoveTo(1));
        assert_eq!(s.status_message, Some(("Image successfully moved to Keep".to_string(), false)));

        let reloaded = ConfigStore::new(dir.path()).history_store().load().unwrap();
        assert_eq!(reloaded.resolve(Path::new("/in/a.png")), Some(Path::new("/out/keep/a.png")));
    }

    #[test]
    fn test_undo_persists_history() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![PathBuf::from("/in/a.png"), PathBuf::from("/in/b.png")];
        let mut s = stored_session(ConfigStore::new(dir.path()), files);
        s.move_to_slot(1).unwrap();
        s.move_to_slot(2).unwrap();
        s.handle_input(InputIntent::Undo);
        assert_eq!(s.status_message.as_ref().map(|(_, err)| *err), Some(false));

        let reloaded = ConfigStore::new(dir.path()).history_store().load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.resolve(Path::new("/in/a.png")), Some(Path::new("/out/keep/a.png")));
        assert_eq!(reloaded.resolve(Path::new("/in/b.png")), None);
    }

    #[test]
    fn test_reset_persists_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stored_session(ConfigStore::new(dir.path()), vec![PathBuf::from("/in/a.png")]);
        s.move_to_slot(1).unwrap();
        s.handle_input(InputIntent::Reset);
        assert_eq!(s.status_message, Some(("Settings reset to defaults.".to_string(), false)));

        let store = ConfigStore::new(dir.path());
        assert!(store.history_store().load().unwrap().is_empty());
        let settings = store.load().unwrap();
        assert!(settings.folders.iter().all(|f| f.is_placeholder()));
        assert!(settings.recent_folders.is_empty());
    }

    #[test]
    fn test_new_writes_back_validated_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        let ledger = Ledger::from_records(vec![
            crate::ledger::MoveRecord::new("/in/a.png", "/out/x/a.png"),
            crate::ledger::MoveRecord::new("/in/a.png", "/out/y/a.png"),
        ]);
        let s = Session::new(MemFs::default(), Settings::default(), ledger, Some(config.clone()));
        assert!(s.status_message.is_none());

        let reloaded = config.history_store().load().unwrap();
        assert_eq!(reloaded.records(), &[crate::ledger::MoveRecord::new("/in/a.png", "/out/y/a.png")]);
    }

    #[test]
    fn test_new_reports_failed_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::from_records(vec![
            crate::ledger::MoveRecord::new("/in/a.png", "/out/x/a.png"),
            crate::ledger::MoveRecord::new("/in/a.png", "/out/y/a.png"),
        ]);
        let s = Session::new(MemFs::default(), Settings::default(), ledger, Some(unwritable_config(dir.path())));
        let (msg, is_error) = s.status_message.clone().unwrap();
        assert!(is_error);
        assert!(msg.starts_with("Could not save the cleaned-up history"));
        assert_eq!(s.ledger().len(), 1);
    }

    #[test]
    fn test_save_failure_reaches_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stored_session(unwritable_config(dir.path()), vec![PathBuf::from("/in/a.png")]);
        s.handle_input(InputIntent::MoveTo(1));

        let (msg, is_error) = s.status_message.clone().unwrap();
        assert!(is_error);
        assert!(msg.starts_with("Image successfully moved to Keep, but the change could not be saved"));
        // The file did move, so the in-memory ledger still tracks it.
        assert_eq!(s.ledger().resolve(Path::new("/in/a.png")), Some(Path::new("/out/keep/a.png")));

        s.handle_input(InputIntent::Undo);
        assert!(s.status_message.as_ref().is_some_and(|(m, err)| *err && m.contains("could not be saved")));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_file_is_not_moved() {
        let dir = tempfile::tempdir().unwrap();
        let odd = Path::new(OsStr::from_bytes(b"/in/caf\xe9.png")).to_path_buf();
        let files = vec![odd.clone(), PathBuf::from("/in/b.png")];
        let mut s = stored_session(ConfigStore::new(dir.path()), files);

        s.handle_input(InputIntent::MoveTo(1));
        let (msg, is_error) = s.status_message.clone().unwrap();
        assert!(is_error);
        assert!(msg.starts_with("Cannot record"));
        assert!(s.fs().exists(&odd));
        assert!(s.ledger().is_empty());

        s.handle_input(InputIntent::Next);
        s.handle_input(InputIntent::MoveTo(1));
        assert_eq!(s.status_message, Some(("Image successfully moved to Keep".to_string(), false)));
        let reloaded = ConfigStore::new(dir.path()).history_store().load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.resolve(Path::new("/in/b.png")), Some(Path::new("/out/keep/b.png")));
    }

    #[test]
    fn test_set_folder_stores_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stored_session(ConfigStore::new(dir.path()), Vec::new());
        s.set_folder(3, "Later", Path::new("sorted/later")).unwrap().into_result().unwrap();

        let stored = &s.settings.folders[2].path;
        assert!(stored.is_absolute());
        assert!(stored.ends_with("sorted/later"));
        assert_eq!(&ConfigStore::new(dir.path()).load().unwrap().folders[2].path, stored);
        assert!(matches!(s.set_folder(6, "x", Path::new("/x")), Err(SortError::UnknownSlot(6))));
    }

    #[test]
    fn test_theme_changes_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stored_session(ConfigStore::new(dir.path()), Vec::new());
        s.set_theme_color(ThemeField::NextBorder, HexColor::rgb(1, 2, 3)).into_result().unwrap();
        assert_eq!(s.settings.theme_mode, ThemeMode::Custom);
        assert_eq!(s.settings.theme().next_border_color, HexColor::rgb(1, 2, 3));

        let loaded = ConfigStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded.theme_mode, ThemeMode::Custom);
        assert_eq!(loaded.custom_theme.get(ThemeField::NextBorder), HexColor::rgb(1, 2, 3));

        s.reset_theme().into_result().unwrap();
        s.set_theme_mode(ThemeMode::Light).into_result().unwrap();
        let loaded = ConfigStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded.custom_theme, crate::config::Theme::dark());
        assert_eq!(loaded.theme_mode, ThemeMode::Light);
    }

    #[test]
    fn test_cycle_theme_intent() {
        let mut s = session(&[]);
        s.handle_input(InputIntent::CycleTheme);
        assert_eq!(s.settings.theme_mode, ThemeMode::Light);
        assert_eq!(s.status_message, Some(("Theme: light".to_string(), false)));
    }

    #[test]
    fn test_clear_recent_folders_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = stored_session(ConfigStore::new(dir.path()), Vec::new());
        s.settings.add_recent_folder(dir.path());
        s.clear_recent_folders().into_result().unwrap();
        assert!(s.settings.recent_folders.is_empty());
        assert!(ConfigStore::new(dir.path()).load().unwrap().recent_folders.is_empty());
    }

    #[test]
    fn test_open_sets_aside_unreadable_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        let history = config.history_store();
        fs::write(history.path(), "{ not json").unwrap();

        let s = Session::open(config.clone()).unwrap();
        assert!(s.ledger().is_empty());
        let (msg, is_error) = s.status_message.clone().unwrap();
        assert!(is_error);
        assert!(msg.contains("history.json.bak"));
        assert_eq!(fs::read_to_string(dir.path().join("history.json.bak")).unwrap(), "{ not json");
        assert!(!history.path().exists());
    }

    #[test]
    fn test_new_validates_loaded_history() {
        let mut ledger = Ledger::new();
        ledger.record_move("/in/a.png", "/out/x/a.png");
        let mut dup = ledger.records().to_vec();
        dup.push(crate::ledger::MoveRecord::new("/in/a.png", "/out/y/a.png"));
        let s = Session::new(MemFs::default(), Settings::default(), Ledger::from_records(dup), None);
        assert_eq!(s.ledger().len(), 1);
        assert!(is_present(&MemFs::with_files(["/out/y/a.png"]), s.ledger(), Path::new("/in/a.png")));
    }
}
