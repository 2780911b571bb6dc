//! Tag-filtered source discovery: walks a module directory and produces a
//! [`SourceSet`] or a conflict/IO error.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::instrument;

use crate::{
    error::{DriverError, Result},
    tags::TagPredicate,
};

pub const LANGUAGE_EXT: &str = "ha";
pub const ASSEMBLY_EXT: &str = "s";
pub const OBJECT_EXT: &str = "o";
pub const LINKER_SCRIPT_EXT: &str = "ld";
const README_MARKER: &str = "README";

#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    pub mtime: Option<SystemTime>,
    pub dirs_traversed: Vec<PathBuf>,
    pub seentags: BTreeSet<String>,
    pub language_sources: Vec<PathBuf>,
    pub assembly_sources: Vec<PathBuf>,
    pub objects: Vec<PathBuf>,
    pub linker_scripts: Vec<PathBuf>,
}

impl SourceSet {
    pub fn is_empty_module(&self) -> bool {
        self.language_sources.is_empty()
    }
}

/// One candidate for a (base, extension) slot, tracked so ties can be
/// reported with every conflicting path.
struct Candidate {
    path: PathBuf,
    depth: usize,
}

#[derive(Default)]
struct Winners {
    // keyed by extension, then by base name
    slots: BTreeMap<&'static str, BTreeMap<String, Vec<Candidate>>>,
}

impl Winners {
    fn offer(&mut self, ext: &'static str, base: String, path: PathBuf, depth: usize) {
        self.slots.entry(ext).or_default().entry(base).or_insert_with(Vec::new).push(Candidate {
            path,
            depth,
        });
    }

    fn resolve(self, dir: &Path) -> Result<SourceSet> {
        let mut set = SourceSet::default();
        for (ext, bases) in self.slots {
            for (base, mut candidates) in bases {
                candidates.sort_by(|a, b| b.depth.cmp(&a.depth));
                let top = candidates[0].depth;
                let winners: Vec<&Candidate> =
                    candidates.iter().filter(|c| c.depth == top).collect();
                if winners.len() > 1 {
                    return Err(DriverError::Conflict {
                        dir: dir.to_path_buf(),
                        base,
                        conflicts: winners.into_iter().map(|c| c.path.clone()).collect(),
                    });
                }
                let winner = candidates.remove(0).path;
                match ext {
                    LANGUAGE_EXT => set.language_sources.push(winner),
                    ASSEMBLY_EXT => set.assembly_sources.push(winner),
                    OBJECT_EXT => set.objects.push(winner),
                    LINKER_SCRIPT_EXT => set.linker_scripts.push(winner),
                    _ => unreachable!("unrecognized extension admitted: {ext}"),
                }
            }
        }
        set.language_sources.sort();
        set.assembly_sources.sort();
        set.objects.sort();
        set.linker_scripts.sort();
        Ok(set)
    }
}

fn ext_of(name: &str) -> Option<&'static str> {
    let ext = name.rsplit('.').next()?;
    match ext {
        LANGUAGE_EXT => Some(LANGUAGE_EXT),
        ASSEMBLY_EXT => Some(ASSEMBLY_EXT),
        OBJECT_EXT => Some(OBJECT_EXT),
        LINKER_SCRIPT_EXT => Some(LINKER_SCRIPT_EXT),
        _ => None,
    }
}

/// Splits `name` at the first `+` or `-` into (base, predicate-string). The
/// predicate string retains its leading sigil so [`TagPredicate::parse`] can
/// determine the first tag's polarity.
fn split_predicate(name: &str) -> (&str, &str) {
    match name.find(['+', '-']) {
        Some(idx) => (&name[..idx], &name[idx..]),
        None => (name, ""),
    }
}

#[instrument(level = "debug", skip(driver_tags), fields(dir = %dir.display()))]
pub fn discover(dir: &Path, driver_tags: &BTreeSet<String>) -> Result<SourceSet> {
    let mut winners = Winners::default();
    let mut mtime = None;
    let mut dirs_traversed = Vec::new();
    let mut seentags = BTreeSet::new();

    walk(dir, 0, driver_tags, &mut winners, &mut mtime, &mut dirs_traversed, &mut seentags)?;

    let mut set = winners.resolve(dir)?;
    set.mtime = mtime;
    set.dirs_traversed = dirs_traversed;
    set.seentags = seentags;

    if set.is_empty_module() && !dir.join(README_MARKER).exists() {
        return Err(DriverError::NoModuleSources { dir: dir.to_path_buf() });
    }

    Ok(set)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    dir: &Path,
    inherited_depth: usize,
    driver_tags: &BTreeSet<String>,
    winners: &mut Winners,
    mtime: &mut Option<SystemTime>,
    dirs_traversed: &mut Vec<PathBuf>,
    seentags: &mut BTreeSet<String>,
) -> Result<()> {
    let meta = fs::metadata(dir).map_err(|e| DriverError::io(e, dir))?;
    bump(mtime, meta.modified().ok());
    dirs_traversed.push(dir.to_path_buf());

    let entries = fs::read_dir(dir).map_err(|e| DriverError::io(e, dir))?;
    for entry in entries {
        let entry = entry.map_err(|e| DriverError::io(e, dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| DriverError::io(e, &path))?;

        // For a symlink, resolve its target's metadata up front to decide
        // file-vs-directory, but defer folding its mtime into the watermark
        // until admission is actually decided below: §4.2 only credits the
        // mtime of a symlink "whose resolved target was traversed", and a
        // tag-excluded, bad-tag, or extension-rejected entry is never
        // traversed even though it was resolved.
        let (resolved_is_dir, symlink_mtime) = if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(target_meta) => (target_meta.is_dir(), target_meta.modified().ok()),
                Err(_) => continue, // broken symlink: not traversed
            }
        } else {
            (file_type.is_dir(), None)
        };

        let name = entry.file_name().to_string_lossy().into_owned();

        if resolved_is_dir {
            let (base, predicate_str) = split_predicate(&name);
            if base.is_empty() && !predicate_str.is_empty() {
                return Err(DriverError::BadTag {
                    path: path.clone(),
                    predicate: name.clone(),
                    reason: "directory name may not start with a tag sigil",
                });
            }
            let predicate = TagPredicate::parse(predicate_str, &path)?;
            if !predicate.matches(driver_tags, seentags) {
                continue;
            }
            bump(mtime, symlink_mtime);
            walk(
                &path,
                inherited_depth + predicate.depth(),
                driver_tags,
                winners,
                mtime,
                dirs_traversed,
                seentags,
            )?;
        } else if file_type.is_file() || file_type.is_symlink() {
            let Some(ext) = ext_of(&name) else { continue };
            // Strip the recognized extension before splitting off the tag
            // predicate: `split_predicate` must see "impl+linux", not
            // "impl+linux.ha", or the predicate string would retain the
            // extension's own `.` and get rejected by the bad-tag check.
            let stem = &name[..name.len() - ext.len() - 1];
            let (base, predicate_str) = split_predicate(stem);
            if base.is_empty() {
                return Err(DriverError::BadTag {
                    path: path.clone(),
                    predicate: name.clone(),
                    reason: "file tag predicate without a preceding base name",
                });
            }
            let predicate = TagPredicate::parse(predicate_str, &path)?;
            if !predicate.matches(driver_tags, seentags) {
                continue;
            }
            bump(mtime, symlink_mtime);
            winners.offer(
                ext,
                base.to_string(),
                path.clone(),
                inherited_depth + predicate.depth(),
            );
        }
    }
    Ok(())
}

fn bump(slot: &mut Option<SystemTime>, candidate: Option<SystemTime>) {
    if let Some(c) = candidate {
        *slot = Some(match *slot {
            Some(existing) if existing > c => existing,
            _ => c,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finds_plain_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.ha"), "").unwrap();
        let set = discover(dir.path(), &tags(&[])).unwrap();
        assert_eq!(set.language_sources.len(), 1);
    }

    #[test]
    fn tag_gated_file_picks_matching_variant() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("impl+linux.ha"), "").unwrap();
        fs::write(dir.path().join("impl+darwin.ha"), "").unwrap();
        let set = discover(dir.path(), &tags(&["linux"])).unwrap();
        assert_eq!(set.language_sources.len(), 1);
        assert!(set.language_sources[0].ends_with("impl+linux.ha"));
        assert!(set.seentags.contains("linux"));
        assert!(set.seentags.contains("darwin"));
    }

    #[test]
    fn conflicting_equal_depth_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x+linux.ha"), "").unwrap();
        fs::write(dir.path().join("x-darwin.ha"), "").unwrap();
        let err = discover(dir.path(), &tags(&["linux"])).unwrap_err();
        assert!(matches!(err, DriverError::Conflict { .. }));
    }

    #[test]
    fn readme_marker_allows_sourceless_namespace_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README"), "").unwrap();
        let set = discover(dir.path(), &tags(&[])).unwrap();
        assert!(set.is_empty_module());
    }

    #[test]
    fn missing_sources_and_readme_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), &tags(&[])).is_err());
    }

    #[test]
    fn tag_minimality_unrelated_tags_do_not_affect_result() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("impl+linux.ha"), "").unwrap();
        fs::write(dir.path().join("impl+darwin.ha"), "").unwrap();
        let a = discover(dir.path(), &tags(&["linux"])).unwrap();
        let b = discover(dir.path(), &tags(&["linux", "unrelated_tag"])).unwrap();
        assert_eq!(a.language_sources, b.language_sources);
    }

    /// Pushes a real file's mtime far into the future so a test can assert
    /// whether that mtime was (wrongly) folded into a `SourceSet` watermark.
    fn set_far_future_mtime(path: &Path) {
        use std::time::{Duration, SystemTime};
        let future = SystemTime::now() + Duration::from_secs(86_400);
        std::fs::File::options().write(true).open(path).unwrap().set_modified(future).unwrap();
    }

    #[test]
    fn excluded_tagged_symlink_does_not_bump_mtime() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.ha"), "").unwrap();

        let target = dir.path().join("target.ha");
        fs::write(&target, "").unwrap();
        set_far_future_mtime(&target);

        // base "linked", predicate "+excludedtag", unsatisfied by the empty
        // driver tag set: this symlink must never be traversed, so its
        // target's far-future mtime must not reach the watermark.
        symlink(&target, dir.path().join("linked+excludedtag.ha")).unwrap();

        let set = discover(dir.path(), &tags(&[])).unwrap();
        let future_cutoff = std::time::SystemTime::now() + std::time::Duration::from_secs(3_600);
        assert!(set.mtime.unwrap() < future_cutoff);
    }

    #[test]
    fn symlink_with_unrecognized_extension_does_not_bump_mtime() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.ha"), "").unwrap();

        let target = dir.path().join("target.ha");
        fs::write(&target, "").unwrap();
        set_far_future_mtime(&target);

        // ".txt" is not one of the four recognized extensions, so this
        // symlink is skipped before any predicate is even evaluated.
        symlink(&target, dir.path().join("notes.txt")).unwrap();

        let set = discover(dir.path(), &tags(&[])).unwrap();
        let future_cutoff = std::time::SystemTime::now() + std::time::Duration::from_secs(3_600);
        assert!(set.mtime.unwrap() < future_cutoff);
    }

    #[test]
    fn admitted_symlinked_file_does_bump_mtime() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.ha"), "").unwrap();

        let target = dir.path().join("target.ha");
        fs::write(&target, "").unwrap();
        set_far_future_mtime(&target);

        // No predicate at all: this symlink is unconditionally admitted, so
        // its target's mtime must reach the watermark.
        symlink(&target, dir.path().join("linked.ha")).unwrap();

        let set = discover(dir.path(), &tags(&[])).unwrap();
        let future_cutoff = std::time::SystemTime::now() + std::time::Duration::from_secs(3_600);
        assert!(set.mtime.unwrap() > future_cutoff);
    }
}
