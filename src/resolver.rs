//! Module resolver: expands a root module identifier into a closed,
//! topologically sorted module graph by a purpose-built lexical scan over
//! `use` headers, rather than a full parse.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::instrument;

use crate::{
    discover::{self, SourceSet},
    error::{DriverError, Result},
    ident::ModuleIdent,
    tags::TagSet,
};

/// Matches `use <ident>[= {bindings}|ident|*];`, capturing just the imported
/// module path. Hare's own grammar is richer (aliasing, member lists); the
/// resolver only needs the identifier being imported.
static RE_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*use\s+([a-zA-Z_][a-zA-Z0-9_]*(?:::[a-zA-Z_][a-zA-Z0-9_]*)*)").unwrap());

#[derive(Debug, Clone)]
pub struct Module {
    pub ident: ModuleIdent,
    pub path: PathBuf,
    pub namespace: ModuleIdent,
    pub sources: SourceSet,
    /// (graph index, identifier) edges to direct dependencies.
    pub deps: Vec<(usize, ModuleIdent)>,
}

#[derive(Debug, Default)]
pub struct Graph {
    /// Topologically sorted, leaves first.
    pub modules: Vec<Module>,
    pub root: usize,
}

/// Colon-separated search path roots, mirroring `HAREPATH`.
pub struct SearchPath {
    pub roots: Vec<PathBuf>,
}

impl SearchPath {
    pub fn parse(var: &str) -> Self {
        Self { roots: var.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect() }
    }

    pub fn locate(&self, ident: &ModuleIdent) -> Option<PathBuf> {
        let rel = ident.to_relative_path();
        for root in &self.roots {
            let candidate = root.join(&rel);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        None
    }
}

fn parse_imports(sources: &SourceSet) -> Result<Vec<ModuleIdent>> {
    let mut idents = Vec::new();
    for src in &sources.language_sources {
        let text = fs::read_to_string(src).map_err(|e| DriverError::io(e, src))?;
        for cap in RE_USE.captures_iter(&text) {
            idents.push(ModuleIdent::parse(&cap[1])?);
        }
    }
    Ok(idents)
}

/// Resolves `root` (either an absolute/relative path or a module identifier
/// to be searched for via `search`) into a topologically sorted graph.
#[instrument(level = "debug", skip(search, tags))]
pub fn resolve(root: &Path, search: &SearchPath, tags: &TagSet) -> Result<Graph> {
    let driver_tags = tags.as_set();

    let mut by_ident: HashMap<ModuleIdent, usize> = HashMap::new();
    let mut modules: Vec<Module> = Vec::new();
    let mut stack: Vec<ModuleIdent> = Vec::new();

    let root_ident = identify(root)?;
    let root_index = load(
        root,
        root_ident.clone(),
        search,
        &driver_tags,
        &mut by_ident,
        &mut modules,
        &mut stack,
    )?;

    let sorted = topo_sort(&modules, root_index);

    Ok(Graph { modules: sorted.0, root: sorted.1 })
}

/// Best-effort identifier for a path given directly on the command line: the
/// last path component becomes the leaf identifier segment. Modules reached
/// purely by identifier (via `search`) get their identifier from the `use`
/// declaration that named them.
fn identify(path: &Path) -> Result<ModuleIdent> {
    let name = path
        .file_name()
        .ok_or_else(|| DriverError::other(format!("cannot identify module at {}", path.display())))?
        .to_string_lossy();
    ModuleIdent::parse(&name)
}

#[allow(clippy::too_many_arguments)]
fn load(
    path: &Path,
    ident: ModuleIdent,
    search: &SearchPath,
    driver_tags: &std::collections::BTreeSet<String>,
    by_ident: &mut HashMap<ModuleIdent, usize>,
    modules: &mut Vec<Module>,
    stack: &mut Vec<ModuleIdent>,
) -> Result<usize> {
    if let Some(&idx) = by_ident.get(&ident) {
        return Ok(idx);
    }
    if stack.contains(&ident) {
        let mut cycle_path = stack.clone();
        cycle_path.push(ident);
        return Err(DriverError::Cycle { path: cycle_path });
    }

    if !path.exists() {
        return Err(DriverError::ModuleNotFound { ident });
    }

    stack.push(ident.clone());

    let sources = discover::discover(path, driver_tags).map_err(|e| match e {
        DriverError::NoModuleSources { .. } => {
            DriverError::ModuleNotFound { ident: ident.clone() }
        }
        other => other,
    })?;
    let imported = parse_imports(&sources)?;

    // Reserve our slot before recursing so self-cycles and diamonds resolve
    // consistently; the real index is fixed once dependencies are loaded.
    let my_index = modules.len();
    modules.push(Module {
        ident: ident.clone(),
        path: path.to_path_buf(),
        namespace: ident.namespace(),
        sources,
        deps: Vec::new(),
    });
    by_ident.insert(ident.clone(), my_index);

    let mut deps = Vec::new();
    for dep_ident in imported {
        if dep_ident == ident {
            continue;
        }
        let dep_path = search.locate(&dep_ident).ok_or_else(|| DriverError::ModuleNotFound {
            ident: dep_ident.clone(),
        })?;
        let dep_index =
            load(&dep_path, dep_ident.clone(), search, driver_tags, by_ident, modules, stack)?;
        deps.push((dep_index, dep_ident));
    }
    modules[my_index].deps = deps;

    stack.pop();
    Ok(my_index)
}

/// Topological sort, leaves first, ties broken by identifier order for
/// reproducible builds. Returns the reordered module list and the new index
/// of the original root.
fn topo_sort(modules: &[Module], root: usize) -> (Vec<Module>, usize) {
    let n = modules.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    fn visit(
        idx: usize,
        modules: &[Module],
        visited: &mut Vec<bool>,
        order: &mut Vec<usize>,
    ) {
        if visited[idx] {
            return;
        }
        visited[idx] = true;
        let mut deps = modules[idx].deps.clone();
        deps.sort_by(|a, b| a.1.cmp(&b.1));
        for (dep_idx, _) in deps {
            visit(dep_idx, modules, visited, order);
        }
        order.push(idx);
    }

    // Visit all modules (not just reachable-from-root-first) in identifier
    // order so the overall order is deterministic regardless of discovery
    // order, then the root's own dependencies naturally precede it.
    let mut all_indices: Vec<usize> = (0..n).collect();
    all_indices.sort_by(|&a, &b| modules[a].ident.cmp(&modules[b].ident));
    for idx in all_indices {
        visit(idx, modules, &mut visited, &mut order);
    }

    let mut old_to_new = vec![0usize; n];
    for (new_idx, &old_idx) in order.iter().enumerate() {
        old_to_new[old_idx] = new_idx;
    }

    let new_modules: Vec<Module> = order
        .iter()
        .map(|&old_idx| {
            let mut m = modules[old_idx].clone();
            m.deps = m.deps.iter().map(|(d, id)| (old_to_new[*d], id.clone())).collect();
            m
        })
        .collect();

    (new_modules, old_to_new[root])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_module(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("main.ha"), body).unwrap();
    }

    #[test]
    fn single_module_no_deps() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "app", "export fn main() void = void;");
        let search = SearchPath { roots: vec![tmp.path().to_path_buf()] };
        let graph = resolve(&tmp.path().join("app"), &search, &TagSet::new()).unwrap();
        assert_eq!(graph.modules.len(), 1);
        assert_eq!(graph.root, 0);
    }

    #[test]
    fn dependency_precedes_dependent_in_topo_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "lib", "export fn helper() void = void;");
        write_module(tmp.path(), "app", "use lib;\nexport fn main() void = void;");
        let search = SearchPath { roots: vec![tmp.path().to_path_buf()] };
        let graph = resolve(&tmp.path().join("app"), &search, &TagSet::new()).unwrap();
        assert_eq!(graph.modules.len(), 2);
        let lib_idx = graph.modules.iter().position(|m| m.ident.to_string() == "lib").unwrap();
        let app_idx = graph.modules.iter().position(|m| m.ident.to_string() == "app").unwrap();
        assert!(lib_idx < app_idx);
        assert_eq!(graph.root, app_idx);
    }

    #[test]
    fn cycle_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "a", "use b;");
        write_module(tmp.path(), "b", "use a;");
        let search = SearchPath { roots: vec![tmp.path().to_path_buf()] };
        let err = resolve(&tmp.path().join("a"), &search, &TagSet::new()).unwrap_err();
        assert!(matches!(err, DriverError::Cycle { .. }));
    }

    #[test]
    fn missing_module_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "app", "use nope;");
        let search = SearchPath { roots: vec![tmp.path().to_path_buf()] };
        let err = resolve(&tmp.path().join("app"), &search, &TagSet::new()).unwrap_err();
        assert!(matches!(err, DriverError::ModuleNotFound { .. }));
    }
}
