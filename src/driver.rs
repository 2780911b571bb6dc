//! Stage driver: assembles the command line for one stage by merging
//! platform defaults, user flags, and derived arguments into a
//! `std::process::Command`, executes it through the cache protocol, and
//! reports the outcome to the scheduler.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use tracing::instrument;

use crate::{
    cache::{self, CacheEntry, CacheOutcome},
    context::Context,
    error::{DriverError, Result},
    fingerprint::{self, FingerprintInputs},
    ident::ModuleIdent,
    stage::Stage,
    taskgraph::Task,
};

fn module_namespace_flag(ctx: &Context, module: &crate::resolver::Module) -> Vec<String> {
    let ns = ctx.namespace_override.clone().unwrap_or_else(|| module.namespace.to_string());
    if ns.is_empty() {
        Vec::new()
    } else {
        vec!["-N".into(), ns]
    }
}

/// `test_flag` and `hosted_main` are computed per-module by the caller: the
/// former follows the root-or-submods-under-cwd rule of the `test`
/// subcommand (§4.8), the latter is true only for the root module, which is
/// the sole module that may supply a hosted `main`.
fn ssa_static_flags(ctx: &Context, module: &crate::resolver::Module, test_flag: bool, hosted_main: bool) -> Vec<String> {
    let mut flags = ctx.platform.ssa_defaults.clone();
    flags.extend(ctx.env.flags.harec.clone());
    flags.push("-a".into());
    flags.push(ctx.arch.name.clone());
    flags.push("-M".into());
    flags.push(module.ident.to_string());
    flags.extend(module_namespace_flag(ctx, module));
    for (k, v) in &ctx.defines {
        flags.push("-D".into());
        flags.push(format!("{k}={v}"));
    }
    if test_flag {
        flags.push("-T".into());
    }
    if hosted_main && !ctx.freestanding {
        flags.push("-m".into());
    }
    flags
}

fn td_env_for(ctx: &Context, module: &crate::resolver::Module, sidecar_hashes: &[(usize, String)]) -> Vec<(ModuleIdent, Option<String>)> {
    module
        .deps
        .iter()
        .map(|(dep_idx, dep_ident)| {
            let from_sidecar = sidecar_hashes.iter().find(|(i, _)| i == dep_idx).map(|(_, h)| h.clone());
            let value = from_sidecar.or_else(|| ctx.env.td_var(dep_ident));
            (dep_ident.clone(), value)
        })
        .collect()
}

/// Assembles the flags for the final link invocation that do *not* embed a
/// path derived from the fingerprint (the output path, the input objects):
/// these are the only pieces of `-l`/`-L`/`-T`/toggle flags that belong in
/// the hashed static flag list. Switches between libc-based linking
/// (invoking `CC`, toggling `--gc-sections` off for dynamic linking) and
/// free-standing linking (invoking `LD` directly) per §4.8.
fn bin_static_args(ctx: &Context) -> (String, Vec<String>) {
    let mut args = ctx.platform.bin_defaults.clone();
    for script in ctx.root_module().sources.linker_scripts.iter() {
        args.push("-T".into());
        args.push(script.to_string_lossy().into_owned());
    }
    for p in &ctx.lib_search_paths {
        args.push("-L".into());
        args.push(p.to_string_lossy().into_owned());
    }

    if ctx.libc_link {
        args.extend(ctx.env.flags.ld.clone());
        args.push("-Wl,--gc-sections".into());
        for lib in &ctx.libs {
            args.push(format!("-l{lib}"));
        }
        args.push("-Wl,--no-gc-sections".into());
        args.extend(ctx.env.flags.ldlink.clone());
        (ctx.env.tools.cc.clone(), args)
    } else {
        args.extend(ctx.env.flags.ld.clone());
        args.push("--gc-sections".into());
        args.push("-z".into());
        args.push("noexecstack".into());
        for lib in &ctx.libs {
            args.push(format!("-l{lib}"));
        }
        args.extend(ctx.env.flags.ldlink.clone());
        (ctx.env.tools.ld.clone(), args)
    }
}

/// Splices `objects` into `static_args` at the position the libc/freestanding
/// split in [`bin_static_args`] expects them (immediately after the
/// gc-sections toggle, before the `-l` flags), then appends `-o out_tmp`.
fn bin_full_args(ctx: &Context, static_args: &[String], objects: &[PathBuf], out_tmp: &Path) -> Vec<String> {
    let toggle = if ctx.libc_link { "-Wl,--gc-sections" } else { "--gc-sections" };
    let splice_at = static_args.iter().position(|a| a == toggle).map(|i| i + 1).unwrap_or(static_args.len());
    let mut args = static_args[..splice_at].to_vec();
    args.extend(objects.iter().map(|p| p.to_string_lossy().into_owned()));
    args.extend_from_slice(&static_args[splice_at..]);
    args.push("-o".into());
    args.push(out_tmp.to_string_lossy().into_owned());
    args
}

/// Runs one task end to end through the cache protocol: compute the
/// fingerprint, try the lock, check freshness, spawn the tool if needed,
/// install the result atomically. Returns `Ok(CacheOutcome::WouldBlock)`
/// rather than an error when the lock is contended; the scheduler is the
/// only caller permitted to see that variant.
#[instrument(level = "debug", skip(ctx, task, sidecar_hashes), fields(stage = %task.stage, module = %ctx.graph.modules[task.module].ident))]
pub fn run_task(
    ctx: &Context,
    task: &Task,
    dep_outputs: &[(usize, PathBuf)],
    sidecar_hashes: &[(usize, String)],
) -> Result<(CacheOutcome, String, Option<PathBuf>, Option<String>)> {
    let module = &ctx.graph.modules[task.module];

    let (tool, args, input_paths, static_flags, hashed_stage_extra): (
        String,
        Vec<String>,
        Vec<PathBuf>,
        Vec<String>,
        Vec<(ModuleIdent, Option<String>)>,
    ) = match task.stage {
        Stage::Ssa => {
            let is_root = task.module == ctx.graph.root;
            let under_cwd = std::env::current_dir().map(|cwd| module.path.starts_with(cwd)).unwrap_or(false);
            let test_flag = ctx.test && (is_root || (ctx.submods && under_cwd));
            let static_flags = ssa_static_flags(ctx, module, test_flag, is_root);
            (ctx.env.tools.harec.clone(), static_flags.clone(), module.sources.language_sources.clone(), static_flags, td_env_for(ctx, module, sidecar_hashes))
        }
        Stage::S => {
            let mut flags = ctx.platform.s_defaults.clone();
            flags.extend(ctx.env.flags.qbe.clone());
            (ctx.env.tools.qbe.clone(), flags.clone(), dep_outputs.iter().map(|(_, p)| p.clone()).collect(), flags, Vec::new())
        }
        Stage::O => {
            let mut flags = ctx.platform.o_defaults.clone();
            flags.extend(ctx.env.flags.r#as.clone());
            // The backend's generated assembly plus any hand-written `.s`
            // files the module supplied directly (discover.rs's
            // `assembly_sources`), which bypass SSA/S entirely.
            let mut inputs: Vec<PathBuf> = dep_outputs.iter().map(|(_, p)| p.clone()).collect();
            inputs.extend(module.sources.assembly_sources.iter().cloned());
            (ctx.env.tools.r#as.clone(), flags.clone(), inputs, flags, Vec::new())
        }
        Stage::Bin => {
            // Every module's assembled object, plus any precompiled `.o`
            // files discovered directly in a module's source tree, which
            // bypass the assembler entirely and link in as-is.
            let mut objects: Vec<PathBuf> = dep_outputs.iter().map(|(_, p)| p.clone()).collect();
            for m in &ctx.graph.modules {
                objects.extend(m.sources.objects.iter().cloned());
            }
            let (tool, args) = bin_static_args(ctx);
            (tool, args.clone(), objects, args, Vec::new())
        }
    };

    let fp_inputs = FingerprintInputs {
        tool_command: &tool,
        static_flags: &static_flags,
        arch_name: &ctx.arch.name,
        toolchain_version_digest: &ctx.toolchain_version_digest,
        td_env: &hashed_stage_extra,
        libs: &ctx.libs,
        input_paths: &input_paths,
    };
    let hash = fingerprint::compute(task.stage, &fp_inputs);

    let cache_root = ctx.env.cache_root.clone();
    let module_rel = module.ident.to_relative_path();
    let entry = CacheEntry::new(&cache_root, &module_rel, hash.clone(), task.stage.extension());

    let Some(_lock) = cache::try_lock(&entry.lock_path())? else {
        return Ok((CacheOutcome::WouldBlock, hash, None, None));
    };

    // `SSA`'s freshness baseline is the module's own recorded source-set
    // mtime (§4.2): its fingerprint is path-based, not content-based, so a
    // content edit that leaves paths unchanged is only caught this way.
    // Every later stage reads prior cache artifacts rather than raw sources;
    // those artifacts keep the same hash-named path across a rebuild (their
    // own fingerprints are path-based too), so staleness only shows up as a
    // newer mtime on the file actually read. Fold that in here so a rebuilt
    // dependency (e.g. `SSA(lib)` after `lib` changes) correctly propagates
    // through `S`/`O`/`BIN` even when none of their own fingerprints moved.
    let min_mtime = match task.stage {
        Stage::Ssa => module.sources.mtime,
        _ => cache::max_mtime(module.sources.mtime, &input_paths),
    };

    if cache::is_fresh(&entry.artifact_path(), min_mtime)? {
        let sidecar = if task.stage == Stage::Ssa {
            std::fs::read_to_string(entry.sidecar_path()).ok()
        } else {
            None
        };
        return Ok((CacheOutcome::Fresh, hash, Some(entry.artifact_path()), sidecar));
    }

    let full_args = match task.stage {
        Stage::Ssa => {
            let mut a = args.clone();
            a.extend(module.sources.language_sources.iter().map(|p| p.to_string_lossy().into_owned()));
            a.push("-t".into());
            a.push(entry.sidecar_tmp_path().to_string_lossy().into_owned());
            a.push("-o".into());
            a.push(entry.tmp_path().to_string_lossy().into_owned());
            a
        }
        Stage::S => {
            let mut a = args.clone();
            a.push("-t".into());
            a.push(ctx.arch.backend_name.clone());
            a.push("-o".into());
            a.push(entry.tmp_path().to_string_lossy().into_owned());
            a.extend(input_paths.iter().map(|p| p.to_string_lossy().into_owned()));
            a
        }
        Stage::O => {
            let mut a = args.clone();
            a.push("-o".into());
            a.push(entry.tmp_path().to_string_lossy().into_owned());
            a.extend(input_paths.iter().map(|p| p.to_string_lossy().into_owned()));
            a
        }
        Stage::Bin => bin_full_args(ctx, &args, &input_paths, &entry.tmp_path()),
    };

    let output = Command::new(&tool)
        .args(&full_args)
        .output()
        .map_err(|e| DriverError::io(e, PathBuf::from(&tool)))?;

    let mut log = Vec::new();
    log.extend_from_slice(&output.stdout);
    log.extend_from_slice(&output.stderr);
    cache::write_tmp(&entry.log_path(), &log)?;

    if !output.status.success() {
        let _ = std::fs::remove_file(entry.tmp_path());
        return Err(DriverError::ToolFailure {
            tool,
            artifact: entry.artifact_path().to_string_lossy().into_owned(),
            log: String::from_utf8_lossy(&log).into_owned(),
        });
    }

    cache::install(&entry.tmp_path(), &entry.artifact_path())?;

    let mut sidecar_value = None;
    if task.stage == Stage::Ssa {
        let td_path = entry.sidecar_tmp_path();
        if td_path.exists() {
            let content = std::fs::read(&td_path).map_err(|e| DriverError::io(e, &td_path))?;
            let td_hash = fingerprint::hash_bytes(&content);
            // Overwrite the tmp file with just the hash before the rename, so
            // the rename remains the single atomic step that brings the
            // sidecar into existence with its final content.
            std::fs::write(&td_path, &td_hash).map_err(|e| DriverError::io(e, &td_path))?;
            cache::install(&td_path, &entry.sidecar_path())?;
            sidecar_value = Some(td_hash);
        }
    }

    let preamble: Vec<String> =
        hashed_stage_extra.iter().filter_map(|(m, v)| v.as_ref().map(|v| format!("HARE_TD_{m}={v}"))).collect();
    cache::write_transcript(&entry.transcript_path(), &preamble, &tool, &full_args)?;

    Ok((CacheOutcome::Built, hash, Some(entry.artifact_path()), sidecar_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EnvConfig, context::Platform, ident::ModuleIdent, resolver::Module};
    use std::collections::BTreeMap;

    fn fake_module(ident: &str) -> Module {
        let ident = ModuleIdent::parse(ident).unwrap();
        Module {
            namespace: ident.namespace(),
            path: PathBuf::from(ident.to_string()),
            ident,
            sources: Default::default(),
            deps: Vec::new(),
        }
    }

    fn fake_ctx(libc_link: bool) -> Context {
        Context {
            arch: crate::context::Arch { name: "x86_64".into(), backend_name: "amd64_sysv".into() },
            platform: Platform::default(),
            graph: crate::resolver::Graph { modules: vec![fake_module("app")], root: 0 },
            namespace_override: None,
            test: false,
            submods: false,
            freestanding: !libc_link,
            libc_link,
            lib_search_paths: vec![],
            libs: vec!["m".into(), "pthread".into()],
            defines: BTreeMap::new(),
            toolchain_version_digest: "digest".into(),
            env: EnvConfig::from_getter(|_| None).unwrap(),
            build_type: crate::context::BuildType::Binary,
            output: None,
            jobs: 1,
        }
    }

    #[test]
    fn ssa_flags_carry_module_and_arch() {
        let ctx = fake_ctx(true);
        let module = &ctx.graph.modules[0];
        let flags = ssa_static_flags(&ctx, module, false, true);
        assert!(flags.windows(2).any(|w| w == ["-a", "x86_64"]));
        assert!(flags.windows(2).any(|w| w == ["-M", "app"]));
        assert!(flags.contains(&"-m".to_string()));
        assert!(!flags.contains(&"-T".to_string()));
    }

    #[test]
    fn test_flag_is_included_when_requested() {
        let ctx = fake_ctx(true);
        let module = &ctx.graph.modules[0];
        let flags = ssa_static_flags(&ctx, module, true, true);
        assert!(flags.contains(&"-T".to_string()));
    }

    #[test]
    fn libc_link_splices_objects_before_dash_l() {
        let ctx = fake_ctx(true);
        let (tool, static_args) = bin_static_args(&ctx);
        assert_eq!(tool, ctx.env.tools.cc);
        let objects = vec![PathBuf::from("a.o"), PathBuf::from("b.o")];
        let full = bin_full_args(&ctx, &static_args, &objects, Path::new("out.tmp"));
        let a_pos = full.iter().position(|x| x == "a.o").unwrap();
        let lib_pos = full.iter().position(|x| x == "-lm").unwrap();
        assert!(a_pos < lib_pos);
        assert_eq!(full.last().unwrap(), "out.tmp");
        assert_eq!(full[full.len() - 2], "-o");
    }

    #[test]
    fn freestanding_link_uses_ld_directly() {
        let ctx = fake_ctx(false);
        let (tool, static_args) = bin_static_args(&ctx);
        assert_eq!(tool, ctx.env.tools.ld);
        assert!(static_args.contains(&"--gc-sections".to_string()));
        assert!(static_args.contains(&"noexecstack".to_string()));
    }
}
