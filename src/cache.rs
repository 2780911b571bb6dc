//! Cache layout and concurrency primitives: advisory locks arbitrate
//! concurrent builders, and artifacts are addressed purely by their
//! fingerprint so two builders racing to produce the same artifact write to
//! the same disjoint set of paths.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};

use fs4::FileExt;

use crate::error::{DriverError, Result};

/// The outcome of attempting to bring one cache entry up to date.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Fresh,
    Built,
    WouldBlock,
}

pub struct CacheEntry {
    pub dir: PathBuf,
    pub hash: String,
    pub ext: &'static str,
}

impl CacheEntry {
    pub fn new(cache_root: &Path, module_path: &Path, hash: String, ext: &'static str) -> Self {
        let dir = cache_root.join(module_path);
        Self { dir, hash, ext }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.hash, self.ext))
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.tmp", self.hash, self.ext))
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.log", self.hash, self.ext))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.lock", self.hash, self.ext))
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.txt", self.hash, self.ext))
    }

    /// For the `SSA` stage only: the sidecar holding the TD content hash.
    pub fn sidecar_path(&self) -> PathBuf {
        self.dir.join(format!("{}.ssa.td", self.hash))
    }

    pub fn sidecar_tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.ssa.td.tmp", self.hash))
    }
}

/// A held advisory lock on a `.lock` file. Releasing is implicit on drop (and
/// on process death, which is the entire point: the kernel releases `flock`s
/// when the holding process exits, so a crash never leaks a stale lock).
pub struct Lock {
    _file: File,
}

/// Attempts to acquire the lock non-blocking. Returns `Ok(None)` (not an
/// error) when another process holds it, matching the `would-block` outcome
/// that is confined to the scheduler and never surfaced to the user.
pub fn try_lock(path: &Path) -> Result<Option<Lock>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DriverError::io(e, parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| DriverError::io(e, path))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(Lock { _file: file })),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(DriverError::io(e, path)),
    }
}

/// True if the artifact exists and its mtime is at or after `min_mtime`
/// (i.e. no newer than the youngest known-dirty input).
pub fn is_fresh(artifact: &Path, min_mtime: Option<SystemTime>) -> Result<bool> {
    let meta = match fs::metadata(artifact) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(DriverError::io(e, artifact)),
    };
    let Some(min) = min_mtime else { return Ok(true) };
    let mtime = meta.modified().map_err(|e| DriverError::io(e, artifact))?;
    Ok(mtime >= min)
}

/// Folds the mtimes of `paths` (ignoring any that cannot be stat'd) into
/// `base`, returning whichever is youngest. Used to extend a freshness
/// baseline from a module's own recorded source mtime to also cover the
/// specific upstream artifacts a later stage reads.
pub fn max_mtime(base: Option<SystemTime>, paths: &[PathBuf]) -> Option<SystemTime> {
    let mut result = base;
    for p in paths {
        if let Ok(meta) = fs::metadata(p) {
            if let Ok(mtime) = meta.modified() {
                result = Some(match result {
                    Some(existing) if existing > mtime => existing,
                    _ => mtime,
                });
            }
        }
    }
    result
}

/// Atomically install `tmp` as `dest`, creating parent directories first.
pub fn install(tmp: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DriverError::io(e, parent))?;
    }
    fs::rename(tmp, dest).map_err(|e| DriverError::io(e, dest))
}

pub fn write_transcript(path: &Path, preamble: &[String], command: &str, args: &[String]) -> Result<()> {
    let mut out = String::new();
    for line in preamble {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&shell_words::join(std::iter::once(command).chain(args.iter().map(|s| s.as_str()))));
    out.push('\n');
    fs::write(path, out).map_err(|e| DriverError::io(e, path))
}

/// Removes everything under `cache_root`, used by the `cache` subcommand.
pub fn clear(cache_root: &Path) -> Result<()> {
    if cache_root.exists() {
        fs::remove_dir_all(cache_root).map_err(|e| DriverError::io(e, cache_root))?;
    }
    Ok(())
}

/// Aggregate size in bytes of everything under `cache_root`.
pub fn size(cache_root: &Path) -> Result<u64> {
    let mut total = 0u64;
    if !cache_root.exists() {
        return Ok(0);
    }
    for entry in walkdir::WalkDir::new(cache_root) {
        let entry = entry.map_err(|e| DriverError::other(e.to_string()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| DriverError::other(e.to_string()))?.len();
        }
    }
    Ok(total)
}

/// Writes `contents` to `tmp`, used by stage execution when the tool's
/// output isn't captured via redirected stdout (reserved for callers that
/// need to stage bytes before the atomic rename, e.g. log capture).
pub fn write_tmp(tmp: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent).map_err(|e| DriverError::io(e, parent))?;
    }
    let mut f = File::create(tmp).map_err(|e| DriverError::io(e, tmp))?;
    f.write_all(contents).map_err(|e| DriverError::io(e, tmp))
}
