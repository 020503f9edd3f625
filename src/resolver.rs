use std::path::{Path, PathBuf};

use crate::fileops::FileSystem;
use crate::ledger::Ledger;

/// Where the file known by `original` lives now. Always call this before
/// asking the filesystem about an entry of the scanned list.
pub fn effective_path(ledger: &Ledger, original: &Path) -> PathBuf {
    ledger.resolve(original).unwrap_or(original).to_path_buf()
}

/// Forward navigation accepts an entry only when its resolved location is
/// on disk.
pub fn is_present<F: FileSystem + ?Sized>(fs: &F, ledger: &Ledger, original: &Path) -> bool {
    fs.exists(&effective_path(ledger, original))
}

/// Backward navigation is looser: the raw path exists, or the ledger knows
/// the file at all, even if that location is currently missing.
pub fn is_known<F: FileSystem + ?Sized>(fs: &F, ledger: &Ledger, original: &Path) -> bool {
    fs.exists(original) || ledger.resolve(original).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileops::mem::MemFs;

    #[test]
    fn test_effective_path_falls_back_to_original() {
        let mut ledger = Ledger::new();
        assert_eq!(effective_path(&ledger, Path::new("/in/a.png")), PathBuf::from("/in/a.png"));
        ledger.record_move("/in/a.png", "/out/A/a.png");
        assert_eq!(effective_path(&ledger, Path::new("/in/a.png")), PathBuf::from("/out/A/a.png"));
    }

    #[test]
    fn test_present_and_known_differ_for_stale_record() {
        let fs = MemFs::with_files(["/in/b.png"]);
        let mut ledger = Ledger::new();
        ledger.record_move("/in/a.png", "/out/A/a.png");

        // Recorded destination vanished: backward still accepts, forward does not.
        assert!(!is_present(&fs, &ledger, Path::new("/in/a.png")));
        assert!(is_known(&fs, &ledger, Path::new("/in/a.png")));

        fs.add(Path::new("/out/A/a.png"));
        assert!(is_present(&fs, &ledger, Path::new("/in/a.png")));
        assert!(is_present(&fs, &ledger, Path::new("/in/b.png")));
        assert!(!is_known(&fs, &ledger, Path::new("/in/c.png")));
    }
}
