use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions picked up by a folder scan, compared case-insensitively.
pub const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff", "heic", "heif", "raw", "psd"];

// The decoder cannot sniff these containers; a non-empty file is accepted as-is.
const OPAQUE_EXTS: &[&str] = &["heic", "heif", "raw", "psd"];

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase())
}

pub fn is_image_ext(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| IMAGE_EXTS.contains(&e.as_str()))
}

/// Natural, case-insensitive file name order. This is the order the
/// filtered view preserves.
pub fn sort_natural(files: &mut [PathBuf]) {
    files.sort_by(|a, b| {
        let name_a = a.file_name().map(|s| s.to_string_lossy().to_lowercase()).unwrap_or_default();
        let name_b = b.file_name().map(|s| s.to_string_lossy().to_lowercase()).unwrap_or_default();
        natord::compare(&name_a, &name_b).then_with(|| a.cmp(b))
    });
}

/// Lists the image files of `folder` by extension only. Symlinked files
/// are listed, symlinked directories are not descended into.
pub fn scan_folder(folder: &Path, recursive: bool) -> io::Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", folder.display()),
        ));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_image_ext(p))
        .filter(|p| {
            // History and settings store paths as JSON/TOML strings.
            let utf8 = p.to_str().is_some();
            if !utf8 {
                warn!(path = %p.display(), "skipping file whose path is not valid UTF-8");
            }
            utf8
        })
        .collect();

    sort_natural(&mut files);
    debug!(folder = %folder.display(), candidates = files.len(), recursive, "scanned folder");
    Ok(files)
}

/// Sniffs the content: true when the decoder recognizes the format.
pub fn is_readable_image(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {}
        _ => return false,
    }
    if extension_of(path).is_some_and(|e| OPAQUE_EXTS.contains(&e.as_str())) {
        return true;
    }
    // ImageReader::open would seed the format from the extension.
    fs::File::open(path)
        .map(|f| image::ImageReader::new(io::BufReader::new(f)))
        .and_then(|r| r.with_guessed_format())
        .map(|r| r.format().is_some())
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub folder: PathBuf,
    pub files: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum ScanEvent {
    Progress { done: usize, total: usize },
    Finished(ImportResult),
    Failed(String),
}

/// Keeps scan order. Progress goes out every 10 files and at the end.
pub fn validate_images(candidates: &[PathBuf], progress_tx: Option<&Sender<ScanEvent>>) -> Vec<PathBuf> {
    let total = candidates.len();
    let processed = AtomicUsize::new(0);

    candidates
        .par_iter()
        .filter(|path| {
            let ok = is_readable_image(path);
            if !ok {
                debug!(path = %path.display(), "rejected: not a readable image");
            }
            if let Some(tx) = progress_tx {
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 10 == 0 || done == total {
                    let _ = tx.send(ScanEvent::Progress { done, total });
                }
            }
            ok
        })
        .cloned()
        .collect()
}

/// A folder import running on a worker thread. The worker never touches
/// session state; its only output is the `Finished` event, whose folder
/// and files are absolute.
pub struct ImportJob {
    folder: PathBuf,
    rx: Receiver<ScanEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

pub fn spawn_import(folder: PathBuf, recursive: bool) -> ImportJob {
    let (tx, rx) = unbounded();
    let worker_folder = folder.clone();

    let handle = thread::spawn(move || {
        let start = Instant::now();
        let worker_folder = match fs::canonicalize(&worker_folder) {
            Ok(p) => p,
            Err(e) => {
                warn!(folder = %worker_folder.display(), "cannot resolve folder: {}", e);
                let _ = tx.send(ScanEvent::Failed(format!("{}: {}", worker_folder.display(), e)));
                return;
            }
        };
        let candidates = match scan_folder(&worker_folder, recursive) {
            Ok(c) => c,
            Err(e) => {
                warn!(folder = %worker_folder.display(), "scan failed: {}", e);
                let _ = tx.send(ScanEvent::Failed(e.to_string()));
                return;
            }
        };
        let _ = tx.send(ScanEvent::Progress { done: 0, total: candidates.len() });

        let files = validate_images(&candidates, Some(&tx));
        info!(
            folder = %worker_folder.display(),
            candidates = candidates.len(),
            valid = files.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "import finished"
        );
        let _ = tx.send(ScanEvent::Finished(ImportResult { folder: worker_folder, files }));
    });

    ImportJob { folder, rx, handle: Some(handle) }
}

impl ImportJob {
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Non-blocking; `None` while the worker has nothing new.
    pub fn poll(&mut self) -> Option<ScanEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(ScanEvent::Failed("scan worker exited unexpectedly".to_string()))
            }
        }
    }

    /// Blocks until the import is done.
    #[cfg(test)]
    pub fn wait(mut self) -> Result<ImportResult, String> {
        loop {
            match self.rx.recv() {
                Ok(ScanEvent::Finished(result)) => {
                    self.join();
                    return Ok(result);
                }
                Ok(ScanEvent::Failed(msg)) => {
                    self.join();
                    return Err(msg);
                }
                Ok(ScanEvent::Progress { .. }) => {}
                Err(_) => {
                    self.join();
                    return Err("scan worker exited unexpectedly".to_string());
                }
            }
        }
    }

    fn join(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path) {
        image::RgbImage::new(2, 2).save(path).unwrap();
    }

    #[test]
    fn test_scan_folder_filters_extensions_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "img10.jpeg", "img2.jpeg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.png"), b"x").unwrap();

        let files = scan_folder(dir.path(), false).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "img2.jpeg", "img10.jpeg"]);

        let deep = scan_folder(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 5);
    }

    #[test]
    fn test_scan_folder_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_folder(&dir.path().join("nope"), false).is_err());
    }

    #[test]
    fn test_validate_rejects_fakes_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let good1 = dir.path().join("1.png");
        let fake = dir.path().join("2.jpg");
        let good2 = dir.path().join("3.png");
        let empty = dir.path().join("4.psd");
        let opaque = dir.path().join("5.heic");
        write_png(&good1);
        fs::write(&fake, b"definitely not a jpeg").unwrap();
        write_png(&good2);
        fs::write(&empty, b"").unwrap();
        fs::write(&opaque, b"ftypheic....").unwrap();

        let candidates = vec![good1.clone(), fake, good2.clone(), empty, opaque.clone()];
        let (tx, rx) = unbounded();
        let valid = validate_images(&candidates, Some(&tx));
        assert_eq!(valid, vec![good1, good2, opaque]);

        let last = rx.try_iter().last();
        assert!(matches!(last, Some(ScanEvent::Progress { done: 5, total: 5 })));
    }

    #[test]
    fn test_spawn_import_hands_back_once() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        fs::write(dir.path().join("b.gif"), b"junk").unwrap();

        let job = spawn_import(dir.path().to_path_buf(), false);
        assert_eq!(job.folder(), dir.path());
        let result = job.wait().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(result.folder, root);
        assert_eq!(result.files, vec![root.join("a.png")]);
    }

    #[test]
    fn test_spawn_import_resolves_folder() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write_png(&dir.path().join("a.png"));

        let winding = dir.path().join("sub").join("..").join(".");
        let result = spawn_import(winding, false).wait().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(result.folder, root);
        assert_eq!(result.files, vec![root.join("a.png")]);
        assert!(result.files.iter().all(|f| f.is_absolute()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_folder_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"caf\xe9.png")), b"x").unwrap();
        fs::write(dir.path().join("b.png"), b"x").unwrap();

        let files = scan_folder(dir.path(), false).unwrap();
        assert_eq!(files, vec![dir.path().join("b.png")]);
    }

    #[test]
    fn test_spawn_import_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = spawn_import(dir.path().join("missing"), false);
        assert!(job.wait().is_err());
    }
}
