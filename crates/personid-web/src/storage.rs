//! Upload and annotated-output files under the static root.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

const UPLOADS_DIR: &str = "uploads";
const PROCESSED_DIR: &str = "processed";
const SHARED_OUTPUT_FILE: &str = "output.jpg";
const OUTPUT_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid upload file name: {0:?}")]
    InvalidFileName(String),
}

/// How stored uploads are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadNaming {
    /// The client's file name (directory parts dropped); a repeat name overwrites.
    Client,
    /// A fresh UUID plus the client's extension.
    Generated,
}

impl FromStr for UploadNaming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(UploadNaming::Client),
            "generated" => Ok(UploadNaming::Generated),
            other => Err(format!("unknown upload naming {other:?}")),
        }
    }
}

/// Where annotated images go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One `processed/output.jpg`, overwritten by every request.
    Shared,
    /// A uniquely named file per request.
    PerRequest,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(OutputMode::Shared),
            "per-request" | "per_request" => Ok(OutputMode::PerRequest),
            other => Err(format!("unknown output mode {other:?}")),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Shared => f.write_str("shared"),
            OutputMode::PerRequest => f.write_str("per-request"),
        }
    }
}

/// Annotated output location: filesystem path and the URL it is served at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub url: String,
}

/// Reference counts of files some request still needs.
type HeldFiles = Arc<Mutex<HashMap<PathBuf, usize>>>;

#[derive(Debug, Clone)]
pub struct Storage {
    static_dir: PathBuf,
    naming: UploadNaming,
    output_mode: OutputMode,
    retain: Option<usize>,
    held: HeldFiles,
}

/// Keeps files out of retention until dropped.
#[derive(Debug)]
pub struct Hold {
    held: HeldFiles,
    paths: Vec<PathBuf>,
}

impl Drop for Hold {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for path in &self.paths {
            let remaining = held.get_mut(path).map(|count| {
                *count -= 1;
                *count
            });
            if remaining == Some(0) {
                held.remove(path);
            }
        }
    }
}

impl Storage {
    pub fn new(static_dir: PathBuf, naming: UploadNaming, output_mode: OutputMode, retain: Option<usize>) -> Self {
        Self {
            static_dir,
            naming,
            output_mode,
            retain,
            held: HeldFiles::default(),
        }
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.static_dir.join(UPLOADS_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.static_dir.join(PROCESSED_DIR)
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Create the upload and processed directories.
    pub fn prepare(&self) -> Result<(), StorageError> {
        for dir in [self.uploads_dir(), self.processed_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
                action: "failed to create",
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Where an upload with this client name is stored.
    pub fn upload_path(&self, client_name: &str) -> Result<PathBuf, StorageError> {
        let base = base_name(client_name).ok_or_else(|| StorageError::InvalidFileName(client_name.to_string()))?;

        let file_name = match self.naming {
            UploadNaming::Client => base.to_string(),
            UploadNaming::Generated => match Path::new(base).extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_ascii_lowercase()),
                None => Uuid::new_v4().to_string(),
            },
        };
        Ok(self.uploads_dir().join(file_name))
    }

    /// Write the uploaded bytes, unmodified, to `path`.
    pub fn write_upload(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        std::fs::write(path, bytes).map_err(|source| StorageError::Io {
            action: "failed to write",
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "upload saved");
        Ok(())
    }

    /// Protect `paths` from retention while the returned guard lives.
    ///
    /// Take the hold before writing, so a concurrent cleanup never sees the
    /// file unprotected.
    pub fn hold(&self, paths: impl IntoIterator<Item = PathBuf>) -> Hold {
        let paths: Vec<PathBuf> = paths.into_iter().collect();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for path in &paths {
            *held.entry(path.clone()).or_default() += 1;
        }
        Hold {
            held: Arc::clone(&self.held),
            paths,
        }
    }

    /// Pick where this request's annotated image goes.
    pub fn output_target(&self) -> OutputTarget {
        let id = Uuid::new_v4();
        match self.output_mode {
            // The query string keeps browsers from showing a cached earlier result.
            OutputMode::Shared => OutputTarget {
                path: self.processed_dir().join(SHARED_OUTPUT_FILE),
                url: format!("/static/{PROCESSED_DIR}/{SHARED_OUTPUT_FILE}?v={id}"),
            },
            OutputMode::PerRequest => {
                let name = format!("{id}.{OUTPUT_EXTENSION}");
                OutputTarget {
                    path: self.processed_dir().join(&name),
                    url: format!("/static/{PROCESSED_DIR}/{name}"),
                }
            }
        }
    }

    /// Delete the oldest stored files beyond the retention limit.
    ///
    /// Applies to uploads, and to outputs in per-request mode. Held files are
    /// neither counted nor removed, and the newest unheld file always
    /// survives. Returns how many files were removed.
    pub fn enforce_retention(&self) -> Result<usize, StorageError> {
        let Some(limit) = self.retain else {
            return Ok(0);
        };
        let limit = limit.max(1);

        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = prune_oldest(&self.uploads_dir(), limit, &held)?;
        if self.output_mode == OutputMode::PerRequest {
            removed += prune_oldest(&self.processed_dir(), limit, &held)?;
        }
        drop(held);
        if removed > 0 {
            tracing::info!(removed, limit, "retention: removed old files");
        }
        Ok(removed)
    }
}

/// Last path component of a client-supplied name, accepting `/` and `\` separators.
fn base_name(client_name: &str) -> Option<&str> {
    let base = client_name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

fn prune_oldest(dir: &Path, keep: usize, held: &HashMap<PathBuf, usize>) -> Result<usize, StorageError> {
    let io_err = |action, path: &Path| {
        let path = path.to_path_buf();
        move |source| StorageError::Io { action, path, source }
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err("failed to list", dir))? {
        let entry = entry.map_err(io_err("failed to list", dir))?;
        let meta = entry.metadata().map_err(io_err("failed to stat", &entry.path()))?;
        if meta.is_file() && !held.contains_key(&entry.path()) {
            files.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), entry.path()));
        }
    }

    if files.len() <= keep {
        return Ok(0);
    }

    // Oldest first; name breaks ties so the order is stable.
    files.sort();
    let excess = files.len() - keep;
    for (_, path) in &files[..excess] {
        std::fs::remove_file(path).map_err(io_err("failed to remove", path))?;
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn storage(dir: &Path, naming: UploadNaming, mode: OutputMode, retain: Option<usize>) -> Storage {
        let storage = Storage::new(dir.to_path_buf(), naming, mode, retain);
        storage.prepare().unwrap();
        storage
    }

    fn save(s: &Storage, client_name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = s.upload_path(client_name)?;
        s.write_upload(&path, bytes)?;
        Ok(path)
    }

    fn set_age(path: &Path, secs_ago: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago)).unwrap();
    }

    #[test]
    fn test_prepare_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, None);
        assert!(s.uploads_dir().is_dir());
        assert!(s.processed_dir().is_dir());
    }

    #[test]
    fn test_client_naming_overwrites_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, None);

        let first = save(&s, "group.jpg", b"one").unwrap();
        let second = save(&s, "group.jpg", b"two").unwrap();

        assert_eq!(first, second);
        assert_eq!(first, s.uploads_dir().join("group.jpg"));
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn test_client_naming_drops_directories() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, None);

        assert_eq!(save(&s, "../../etc/passwd", b"x").unwrap(), s.uploads_dir().join("passwd"));
        assert_eq!(save(&s, "C:\\Users\\me\\face.png", b"x").unwrap(), s.uploads_dir().join("face.png"));
        assert!(matches!(save(&s, "..", b"x"), Err(StorageError::InvalidFileName(_))));
        assert!(matches!(save(&s, "photos/", b"x"), Err(StorageError::InvalidFileName(_))));
    }

    #[test]
    fn test_generated_naming_is_unique_and_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Generated, OutputMode::Shared, None);

        let a = save(&s, "group.JPG", b"one").unwrap();
        let b = save(&s, "group.JPG", b"two").unwrap();

        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(&a).unwrap(), b"one");
    }

    #[test]
    fn test_shared_output_target_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, None);

        let a = s.output_target();
        let b = s.output_target();
        assert_eq!(a.path, s.processed_dir().join("output.jpg"));
        assert_eq!(a.path, b.path);
        assert!(a.url.starts_with("/static/processed/output.jpg?v="));
    }

    #[test]
    fn test_per_request_output_targets_differ() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::PerRequest, None);

        let a = s.output_target();
        let b = s.output_target();
        assert_ne!(a.path, b.path);
        assert_eq!(a.path.parent().unwrap(), s.processed_dir());
        assert!(a.url.starts_with("/static/processed/") && a.url.ends_with(".jpg"));
    }

    #[test]
    fn test_retention_removes_oldest_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, Some(2));

        let old = save(&s, "old.jpg", b"1").unwrap();
        let mid = save(&s, "mid.jpg", b"2").unwrap();
        let new = save(&s, "new.jpg", b"3").unwrap();
        set_age(&old, 300);
        set_age(&mid, 200);
        set_age(&new, 100);

        assert_eq!(s.enforce_retention().unwrap(), 1);
        assert!(!old.exists());
        assert!(mid.exists());
        assert!(new.exists());
    }

    #[test]
    fn test_retention_spares_held_upload() {
        // A saved upload still waiting for the engine survives a newer request's cleanup.
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::PerRequest, Some(1));

        let queued = s.upload_path("a.png").unwrap();
        let queued_output = s.output_target().path;
        let hold = s.hold([queued.clone(), queued_output.clone()]);
        s.write_upload(&queued, b"a").unwrap();
        std::fs::write(&queued_output, b"out").unwrap();
        set_age(&queued, 300);
        set_age(&queued_output, 300);

        let done = save(&s, "b.png", b"b").unwrap();
        let done_output = s.output_target().path;
        std::fs::write(&done_output, b"out").unwrap();

        assert_eq!(s.enforce_retention().unwrap(), 0);
        assert!(queued.exists() && queued_output.exists());
        assert!(done.exists() && done_output.exists());

        drop(hold);
        assert_eq!(s.enforce_retention().unwrap(), 2);
        assert!(!queued.exists() && !queued_output.exists());
        assert!(done.exists() && done_output.exists());
    }

    #[test]
    fn test_hold_counts_overlapping_requests() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, Some(1));
        let path = save(&s, "same.png", b"x").unwrap();
        set_age(&path, 300);
        save(&s, "newer.png", b"y").unwrap();

        let first = s.hold([path.clone()]);
        let second = s.hold([path.clone()]);
        drop(first);
        assert_eq!(s.enforce_retention().unwrap(), 0);
        assert!(path.exists());

        drop(second);
        assert_eq!(s.enforce_retention().unwrap(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_retention_unbounded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Generated, OutputMode::Shared, None);
        for _ in 0..5 {
            save(&s, "x.png", b"x").unwrap();
        }
        assert_eq!(s.enforce_retention().unwrap(), 0);
        assert_eq!(std::fs::read_dir(s.uploads_dir()).unwrap().count(), 5);
    }

    #[test]
    fn test_retention_keeps_at_least_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), UploadNaming::Client, OutputMode::Shared, Some(0));
        let a = save(&s, "a.png", b"a").unwrap();
        let b = save(&s, "b.png", b"b").unwrap();
        set_age(&a, 100);

        assert_eq!(s.enforce_retention().unwrap(), 1);
        assert!(b.exists());
    }

    #[test]
    fn test_naming_and_mode_parse() {
        assert_eq!("Generated".parse::<UploadNaming>(), Ok(UploadNaming::Generated));
        assert_eq!("per_request".parse::<OutputMode>(), Ok(OutputMode::PerRequest));
        assert!("sometimes".parse::<OutputMode>().is_err());
        assert_eq!(OutputMode::PerRequest.to_string(), "per-request");
    }
}
