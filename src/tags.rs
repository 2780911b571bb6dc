//! Driver tag sets and file/directory tag predicates.
//!
//! A driver tag set is an insertion-ordered list of positive tag names
//! (`+linux +x86_64`). A predicate attached to a file or directory name may
//! mix polarities (`impl+linux-debug.ha`): every inclusive tag must be
//! present in the driver's set, every exclusive tag must be absent.

use std::collections::BTreeSet;

use crate::error::{DriverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Polarity {
    Include,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPredicate {
    pub tags: Vec<(String, Polarity)>,
}

impl TagPredicate {
    pub fn empty() -> Self {
        Self { tags: Vec::new() }
    }

    /// Parse a predicate string such as `linux-debug` (no leading sigil: the
    /// first tag's polarity is inclusive unless prefixed with `-`).
    ///
    /// `path` and `is_file_without_base` are used only to produce precise
    /// `bad-tag` errors per the discovery rules: a bare leading sigil on a
    /// file without a preceding base name, or any leading sigil on a
    /// directory name, is rejected.
    pub fn parse(predicate: &str, path: &std::path::Path) -> Result<Self> {
        if predicate.contains('.') {
            return Err(DriverError::BadTag {
                path: path.to_path_buf(),
                predicate: predicate.to_string(),
                reason: "tag predicate may not contain '.'",
            });
        }
        if predicate.is_empty() {
            return Ok(Self::empty());
        }

        let mut tags = Vec::new();
        let mut rest = predicate;
        // The first tag has an implicit leading sigil carried in by the
        // caller (see discover.rs, which passes the substring starting at
        // the first `+`/`-`), so every remaining occurrence of `+`/`-` also
        // starts a new tag.
        loop {
            let sigil = rest.chars().next().ok_or(DriverError::BadTag {
                path: path.to_path_buf(),
                predicate: predicate.to_string(),
                reason: "empty tag after separator",
            })?;
            let polarity = match sigil {
                '+' => Polarity::Include,
                '-' => Polarity::Exclude,
                _ => {
                    return Err(DriverError::BadTag {
                        path: path.to_path_buf(),
                        predicate: predicate.to_string(),
                        reason: "tag must start with '+' or '-'",
                    })
                }
            };
            rest = &rest[1..];
            let end = rest.find(['+', '-']).unwrap_or(rest.len());
            let (name, remainder) = rest.split_at(end);
            if name.is_empty() {
                return Err(DriverError::BadTag {
                    path: path.to_path_buf(),
                    predicate: predicate.to_string(),
                    reason: "empty tag name",
                });
            }
            tags.push((name.to_string(), polarity));
            if remainder.is_empty() {
                break;
            }
            rest = remainder;
        }
        Ok(Self { tags })
    }

    /// True if every inclusive tag is present in `driver_tags` and every
    /// exclusive tag is absent. Records each consulted tag name into `seen`.
    pub fn matches(&self, driver_tags: &BTreeSet<String>, seen: &mut BTreeSet<String>) -> bool {
        let mut ok = true;
        for (name, polarity) in &self.tags {
            seen.insert(name.clone());
            let present = driver_tags.contains(name);
            let satisfied = match polarity {
                Polarity::Include => present,
                Polarity::Exclude => !present,
            };
            if !satisfied {
                ok = false;
            }
        }
        ok
    }

    /// Sum of tag predicates along a path: used to break ties between
    /// candidate files for the same (base, extension).
    pub fn depth(&self) -> usize {
        self.tags.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagSet {
    tags: Vec<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn as_set(&self) -> BTreeSet<String> {
        self.tags.iter().cloned().collect()
    }

    /// Parse the CLI override syntax `+tag-tag+tag`.
    pub fn parse_override(s: &str) -> Result<Self> {
        let mut set = Self::new();
        if s.is_empty() {
            return Ok(set);
        }
        let mut rest = s;
        loop {
            let sigil = rest.chars().next().ok_or_else(|| {
                DriverError::other(format!("bad tag set override: {s:?}"))
            })?;
            if sigil != '+' && sigil != '-' {
                return Err(DriverError::other(format!(
                    "tag set override must start each tag with '+' or '-': {s:?}"
                )));
            }
            rest = &rest[1..];
            let end = rest.find(['+', '-']).unwrap_or(rest.len());
            let (name, remainder) = rest.split_at(end);
            if sigil == '+' {
                set.push(name);
            }
            if remainder.is_empty() {
                break;
            }
            rest = remainder;
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_matches_inclusive() {
        let p = TagPredicate::parse("+linux", std::path::Path::new("x")).unwrap();
        let mut seen = BTreeSet::new();
        let driver: BTreeSet<String> = ["linux".to_string()].into_iter().collect();
        assert!(p.matches(&driver, &mut seen));
        assert_eq!(seen, ["linux".to_string()].into_iter().collect());
    }

    #[test]
    fn predicate_matches_exclusive() {
        let p = TagPredicate::parse("-darwin", std::path::Path::new("x")).unwrap();
        let driver: BTreeSet<String> = ["linux".to_string()].into_iter().collect();
        let mut seen = BTreeSet::new();
        assert!(p.matches(&driver, &mut seen));
    }

    #[test]
    fn predicate_with_dot_is_bad_tag() {
        assert!(TagPredicate::parse("+linux.bak", std::path::Path::new("x")).is_err());
    }

    #[test]
    fn mixed_polarity_predicate() {
        let p = TagPredicate::parse("+linux-debug", std::path::Path::new("x")).unwrap();
        assert_eq!(p.depth(), 2);
        let driver: BTreeSet<String> = ["linux".to_string()].into_iter().collect();
        let mut seen = BTreeSet::new();
        assert!(p.matches(&driver, &mut seen));
    }

    #[test]
    fn override_syntax_builds_positive_set() {
        let set = TagSet::parse_override("+linux-debug+x86_64").unwrap();
        let s = set.as_set();
        assert!(s.contains("linux"));
        assert!(s.contains("x86_64"));
        assert!(!s.contains("debug"));
    }
}
