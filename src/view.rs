use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::cursor::first_valid_index;
use crate::error::SortError;
use crate::fileops::FileSystem;
use crate::ledger::{Ledger, same_path};
use crate::resolver::is_known;
use crate::scanner::{IMAGE_EXTS, extension_of};

/// Extension predicate selecting the visible part of the scanned list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExtensionFilter {
    #[default]
    All,
    /// Lowercase, without the dot.
    Only(String),
}

impl ExtensionFilter {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            ExtensionFilter::All => true,
            ExtensionFilter::Only(ext) => extension_of(path).is_some_and(|e| &e == ext),
        }
    }

    /// `All`, then every recognized extension, then back to `All`.
    pub fn cycle(&self) -> Self {
        match self {
            ExtensionFilter::All => ExtensionFilter::Only(IMAGE_EXTS[0].to_string()),
            ExtensionFilter::Only(ext) => match IMAGE_EXTS.iter().position(|e| e == ext) {
                Some(i) if i + 1 < IMAGE_EXTS.len() => ExtensionFilter::Only(IMAGE_EXTS[i + 1].to_string()),
                _ => ExtensionFilter::All,
            },
        }
    }
}

impl fmt::Display for ExtensionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionFilter::All => write!(f, "All Files"),
            ExtensionFilter::Only(ext) => write!(f, ".{}", ext),
        }
    }
}

impl FromStr for ExtensionFilter {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() || token == "*" || token.eq_ignore_ascii_case("all") || token.eq_ignore_ascii_case("all files") {
            return Ok(ExtensionFilter::All);
        }
        let ext = token.trim_start_matches('.').to_lowercase();
        if IMAGE_EXTS.contains(&ext.as_str()) {
            Ok(ExtensionFilter::Only(ext))
        } else {
            Err(SortError::InvalidFilterPredicate(s.to_string()))
        }
    }
}

/// `[f for f in full if predicate(f)]`, scan order kept.
pub fn apply_filter<P>(full: &[PathBuf], predicate: P) -> Vec<PathBuf>
where
    P: Fn(&Path) -> bool,
{
    full.iter().filter(|p| predicate(p)).cloned().collect()
}

/// The visible subsequence of the scanned list.
#[derive(Debug, Clone, Default)]
pub struct FilteredView {
    filter: ExtensionFilter,
    entries: Vec<PathBuf>,
}

impl FilteredView {
    pub fn filter(&self) -> &ExtensionFilter {
        &self.filter
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.entries.get(index).map(|p| p.as_path())
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|p| same_path(p, path))
    }

    /// Recomputes entries under the current filter.
    pub fn rebuild(&mut self, full: &[PathBuf]) {
        let filter = self.filter.clone();
        self.entries = apply_filter(full, |p| filter.matches(p));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Switches to `filter` and returns where the cursor should land:
    /// the previously selected file when it is still visible, else the
    /// first entry present on disk, else the first entry known at all.
    pub fn refilter<F: FileSystem + ?Sized>(
        &mut self,
        full: &[PathBuf],
        filter: ExtensionFilter,
        selected: Option<&Path>,
        fs: &F,
        ledger: &Ledger,
    ) -> Option<usize> {
        self.filter = filter;
        self.rebuild(full);
        debug!(filter = %self.filter, visible = self.entries.len(), "view refiltered");

        if self.entries.is_empty() {
            return None;
        }
        if let Some(i) = selected.and_then(|s| self.position_of(s)) {
            return Some(i);
        }
        first_valid_index(&self.entries, fs, ledger)
            .or_else(|| (0..self.entries.len()).find(|&i| is_known(fs, ledger, &self.entries[i])))
            .or(Some(0))
    }
}
