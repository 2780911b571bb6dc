//! A fixed-capacity, explicitly normalized filesystem path buffer.
//!
//! Unlike [`std::path::PathBuf`], which grows without bound and leaves
//! normalization to the caller, this buffer has a hard capacity and
//! normalizes on every push: `.` is dropped, `..` pops a segment (or is
//! appended literally when there is nothing left to pop), and redundant
//! separators never appear in the stored form. Overflow is a first-class
//! error rather than a panic or silent truncation, matching how the rest of
//! this crate treats filesystem limits as ordinary, recoverable failures.

use std::fmt;

use crate::error::{DriverError, Result};

/// Maximum stored length in bytes, including separators. Generous for any
/// real module tree while keeping the type `Copy`-friendly in spirit (it is
/// not `Copy` because it owns a `String`, but it never reallocates).
pub const MAX_PATH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathBuffer {
    // Canonical form: no trailing separator (except the root "/" itself),
    // no "." segments, no empty segments.
    buf: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl PathBuffer {
    /// An empty, relative buffer. `string()` on this returns `"."`.
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    pub fn init<I, S>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut buf = Self::new();
        buf.push_all(components)?;
        Ok(buf)
    }

    pub fn set<I, S>(&mut self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.buf.clear();
        self.push_all(components)
    }

    pub fn push_all<I, S>(&mut self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut first = true;
        for c in components {
            let c = c.as_ref();
            if first && self.buf.is_empty() && c.starts_with('/') {
                self.buf.push('/');
            }
            first = false;
            for segment in c.split('/') {
                self.push(segment)?;
            }
        }
        Ok(())
    }

    /// Append a single path segment, applying `.`/`..` normalization.
    ///
    /// An empty segment (from a doubled separator) is a no-op. `.` is a
    /// no-op. `..` pops the last segment unless the buffer is the root
    /// (idempotent there too) or is empty / already ends in `..` (appended
    /// literally in both of those cases).
    pub fn push(&mut self, segment: &str) -> Result<()> {
        match segment {
            "" | "." => Ok(()),
            ".." => {
                if self.isroot() {
                    return Ok(());
                }
                if self.buf.is_empty() || self.peek() == Some("..") {
                    return self.append_segment("..");
                }
                self.pop();
                Ok(())
            }
            seg => self.append_segment(seg),
        }
    }

    fn append_segment(&mut self, seg: &str) -> Result<()> {
        let extra = if self.buf.is_empty() || self.buf == "/" { seg.len() } else { seg.len() + 1 };
        if self.buf.len() + extra > MAX_PATH {
            return Err(DriverError::PathOverflow {
                current: self.buf.clone(),
                component: seg.to_string(),
            });
        }
        if self.buf.is_empty() {
            self.buf.push_str(seg);
        } else if self.buf == "/" {
            self.buf.push_str(seg);
        } else {
            self.buf.push('/');
            self.buf.push_str(seg);
        }
        Ok(())
    }

    /// Remove and return the last segment. Root and empty buffers are no-ops
    /// that return `None`.
    pub fn pop(&mut self) -> Option<String> {
        if self.buf.is_empty() || self.isroot() {
            return None;
        }
        match self.buf.rfind('/') {
            Some(0) => {
                // One segment below root, e.g. "/usr" -> "/"
                let popped = self.buf[1..].to_string();
                self.buf.truncate(1);
                Some(popped)
            }
            Some(idx) => {
                let popped = self.buf[idx + 1..].to_string();
                self.buf.truncate(idx);
                Some(popped)
            }
            None => {
                let popped = std::mem::take(&mut self.buf);
                Some(popped)
            }
        }
    }

    /// The last segment, without mutating the buffer.
    pub fn peek(&self) -> Option<&str> {
        if self.buf.is_empty() || self.isroot() {
            return None;
        }
        self.buf.rsplit('/').next()
    }

    /// The path with one `..` applied, without mutating `self`.
    pub fn parent(&self) -> Self {
        let mut clone = self.clone();
        clone.push("..").ok();
        clone
    }

    pub fn iter(&self, direction: Direction) -> Box<dyn Iterator<Item = &str> + '_> {
        let is_abs = self.abs();
        let segments: Vec<&str> = if self.buf.is_empty() {
            Vec::new()
        } else if is_abs {
            self.buf[1..].split('/').filter(|s| !s.is_empty()).collect()
        } else {
            self.buf.split('/').collect()
        };

        let root_sep: &str = "/";
        match direction {
            Direction::Forward => {
                if is_abs {
                    Box::new(std::iter::once(root_sep).chain(segments))
                } else {
                    Box::new(segments.into_iter())
                }
            }
            Direction::Reverse => {
                if is_abs {
                    Box::new(segments.into_iter().rev().chain(std::iter::once(root_sep)))
                } else {
                    Box::new(segments.into_iter().rev())
                }
            }
        }
    }

    pub fn abs(&self) -> bool {
        self.buf.starts_with('/')
    }

    pub fn isroot(&self) -> bool {
        self.buf == "/"
    }

    pub fn string(&self) -> &str {
        if self.buf.is_empty() {
            "."
        } else {
            &self.buf
        }
    }

    pub fn as_path(&self) -> &std::path::Path {
        std::path::Path::new(self.string())
    }
}

impl Default for PathBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PathBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.string())
    }
}

impl From<&std::path::Path> for PathBuffer {
    fn from(p: &std::path::Path) -> Self {
        let mut buf = Self::new();
        for c in p.components() {
            match c {
                std::path::Component::RootDir => {
                    buf.buf = "/".to_string();
                }
                std::path::Component::Normal(s) => {
                    let _ = buf.push(&s.to_string_lossy());
                }
                std::path::Component::ParentDir => {
                    let _ = buf.push("..");
                }
                std::path::Component::CurDir | std::path::Component::Prefix(_) => {}
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_string_is_dot() {
        assert_eq!(PathBuffer::new().string(), ".");
    }

    #[test]
    fn push_then_pop_is_noop() {
        let mut p = PathBuffer::init(["a", "b"]).unwrap();
        let before = p.string().to_string();
        p.push("c").unwrap();
        p.pop();
        assert_eq!(p.string(), before);
    }

    #[test]
    fn dotdot_on_root_is_idempotent() {
        let mut p = PathBuffer::init(["/"]).unwrap();
        assert!(p.isroot());
        p.push("..").unwrap();
        assert!(p.isroot());
    }

    #[test]
    fn dotdot_on_empty_appends_literally() {
        let mut p = PathBuffer::new();
        p.push("..").unwrap();
        assert_eq!(p.string(), "..");
        p.push("..").unwrap();
        assert_eq!(p.string(), "../..");
    }

    #[test]
    fn dot_is_noop() {
        let mut p = PathBuffer::init(["a"]).unwrap();
        p.push(".").unwrap();
        assert_eq!(p.string(), "a");
    }

    #[test]
    fn overflow_is_an_error() {
        let mut p = PathBuffer::new();
        let huge = "x".repeat(MAX_PATH + 1);
        assert!(p.push(&huge).is_err());
    }

    #[test]
    fn absolute_iter_yields_root_first() {
        let p = PathBuffer::init(["/", "usr", "bin"]).unwrap();
        let fwd: Vec<&str> = p.iter(Direction::Forward).collect();
        assert_eq!(fwd, vec!["/", "usr", "bin"]);
        let rev: Vec<&str> = p.iter(Direction::Reverse).collect();
        assert_eq!(rev, vec!["bin", "usr", "/"]);
    }

    #[test]
    fn parent_does_not_mutate() {
        let p = PathBuffer::init(["a", "b"]).unwrap();
        let parent = p.parent();
        assert_eq!(parent.string(), "a");
        assert_eq!(p.string(), "a/b");
    }

    proptest::proptest! {
        #[test]
        fn push_pop_roundtrip(seg in "[a-zA-Z][a-zA-Z0-9_]{0,16}") {
            let mut p = PathBuffer::init(["base"]).unwrap();
            let before = p.string().to_string();
            p.push(&seg).unwrap();
            p.pop();
            proptest::prop_assert_eq!(p.string(), before);
        }
    }
}
