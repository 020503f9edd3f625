use std::path::PathBuf;

use crate::fileops::FileSystem;
use crate::ledger::Ledger;
use crate::resolver::{is_known, is_present};

/// First index after `from` whose resolved location exists on disk.
pub fn next_valid_index<F: FileSystem + ?Sized>(
    from: usize,
    view: &[PathBuf],
    fs: &F,
    ledger: &Ledger,
) -> Option<usize> {
    (from.saturating_add(1)..view.len()).find(|&i| is_present(fs, ledger, &view[i]))
}

/// Forward search starting at the very first entry.
pub fn first_valid_index<F: FileSystem + ?Sized>(view: &[PathBuf], fs: &F, ledger: &Ledger) -> Option<usize> {
    (0..view.len()).find(|&i| is_present(fs, ledger, &view[i]))
}

/// Nearest index before `from` that exists as scanned or has a ledger
/// entry. See `resolver::is_known` for why this is looser than forward.
pub fn previous_valid_index<F: FileSystem + ?Sized>(
    from: usize,
    view: &[PathBuf],
    fs: &F,
    ledger: &Ledger,
) -> Option<usize> {
    (0..from.min(view.len())).rev().find(|&i| is_known(fs, ledger, &view[i]))
}

/// Position in the filtered view plus the stack of positions visited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    index: Option<usize>,
    history: Vec<usize>,
}

impl Cursor {
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn set(&mut self, index: Option<usize>) {
        self.index = index;
    }

    #[cfg(test)]
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    pub fn push_history(&mut self, index: usize) {
        self.history.push(index);
    }

    /// Drops remembered positions that no longer exist in a view of `len`.
    pub fn prune_history(&mut self, len: usize) {
        self.history.retain(|&i| i < len);
    }

    pub fn reset(&mut self, len: usize) {
        self.history.clear();
        self.index = if len == 0 { None } else { Some(0) };
    }

    /// Restores `0 <= index < len`, or no selection for an empty view.
    pub fn clamp(&mut self, len: usize) {
        self.index = match (self.index, len) {
            (_, 0) => None,
            (Some(i), len) => Some(i.min(len - 1)),
            (None, _) => Some(0),
        };
    }

    pub fn advance<F: FileSystem + ?Sized>(&mut self, view: &[PathBuf], fs: &F, ledger: &Ledger) -> Option<usize> {
        let current = self.index?;
        let next = next_valid_index(current, view, fs, ledger)?;
        self.history.push(current);
        self.prune_history(view.len());
        self.index = Some(next);
        Some(next)
    }

    pub fn retreat<F: FileSystem + ?Sized>(&mut self, view: &[PathBuf], fs: &F, ledger: &Ledger) -> Option<usize> {
        let current = self.index?;
        let prev = previous_valid_index(current, view, fs, ledger)?;
        self.history.push(current);
        self.index = Some(prev);
        Some(prev)
    }

    /// Records the current position, then advances.
    pub fn skip<F: FileSystem + ?Sized>(&mut self, view: &[PathBuf], fs: &F, ledger: &Ledger) -> Option<usize> {
        if let Some(current) = self.index {
            self.history.push(current);
        }
        self.advance(view, fs, ledger)
    }
}
