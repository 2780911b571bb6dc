//! The `hare` driver binary: parses the CLI, assembles a [`Context`], resolves
//! the module graph, builds the task graph, and drives the scheduler. A
//! clap-derive CLI with `#[command(author, version, about)]`, a single
//! `tracing-subscriber` initialization gated on `RUST_LOG`, and exit codes
//! carried by the error type rather than matched ad hoc at `main`.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    process::{Command, ExitCode},
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use hare_build::{
    arch, cache,
    config::EnvConfig,
    context::{BuildType, Context},
    error::DriverError,
    fingerprint,
    resolver::{self, SearchPath},
    scheduler,
    tags::TagSet,
    taskgraph::TaskGraph,
    Result,
};

#[derive(Parser)]
#[command(name = "hare", author, version, about = "Build driver for the Hare programming language")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: SubCmd,
}

#[derive(Subcommand)]
enum SubCmd {
    /// Build a module into an assembly, object, or binary artifact.
    Build(BuildArgs),
    /// Build a binary and execute it, forwarding its exit status.
    Run(BuildArgs),
    /// Build a binary with the test flag set and execute it.
    Test(BuildArgs),
    /// Inspect or clear the on-disk build cache.
    Cache(CacheArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BuildTypeArg {
    Assembly,
    Object,
    Binary,
}

impl From<BuildTypeArg> for BuildType {
    fn from(v: BuildTypeArg) -> Self {
        match v {
            BuildTypeArg::Assembly => BuildType::Assembly,
            BuildTypeArg::Object => BuildType::Object,
            BuildTypeArg::Binary => BuildType::Binary,
        }
    }
}

#[derive(Args, Clone)]
struct BuildArgs {
    /// Module path or identifier to build.
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Target architecture; defaults to the host architecture.
    #[arg(short = 'a', long)]
    arch: Option<String>,

    /// Produce a freestanding binary: no libc, no hosted entry point.
    #[arg(short = 'f', long)]
    freestanding: bool,

    /// Output path for the final artifact.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Build type: stop after assembly, after the object file, or link a
    /// full binary.
    #[arg(short = 't', long = "type", value_enum, default_value = "binary")]
    build_type: BuildTypeArg,

    /// Namespace override applied to the root module's `-N` flag.
    #[arg(short = 'N', long)]
    namespace: Option<String>,

    /// Define a constant as `ident[:type]=value`. Repeatable.
    #[arg(short = 'D', long = "define", value_name = "ident[:type]=value", value_parser = parse_define)]
    defines: Vec<(String, String)>,

    /// Library search path. Repeatable.
    #[arg(short = 'L', long = "libdir", value_name = "path")]
    lib_search_paths: Vec<PathBuf>,

    /// Link against a library by name. Repeatable.
    #[arg(short = 'l', long = "lib", value_name = "name")]
    libs: Vec<String>,

    /// Tag set override, e.g. `+linux-debug+x86_64`; defaults to the host
    /// architecture and operating system.
    #[arg(short = 'T', long = "tags")]
    tags: Option<String>,

    /// Also apply the test flag to submodules discovered under the current
    /// working directory.
    #[arg(short = 's', long)]
    submods: bool,

    /// Number of parallel jobs; defaults to the number of logical CPUs.
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Increase log verbosity; repeatable.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments forwarded to the built artifact by `run`/`test`; ignored by
    /// `build`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    run_args: Vec<String>,
}

#[derive(Args, Clone)]
struct CacheArgs {
    #[command(subcommand)]
    action: CacheAction,
}

#[derive(Subcommand, Clone)]
enum CacheAction {
    /// Print the total size of the cache in bytes.
    Size,
    /// Remove everything under the cache root.
    Clean,
}

fn parse_define(s: &str) -> std::result::Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("define must be of the form ident[:type]=value: {s:?}"))?;
    if k.is_empty() || v.is_empty() {
        return Err(format!("define must be of the form ident[:type]=value: {s:?}"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// The host architecture/OS name pair used as the default tag set, mirroring
/// Hare's own `-T` default: the build's own architecture and operating
/// system are always members unless the user overrides the whole set.
fn default_tags(arch_name: &str) -> TagSet {
    let mut tags = TagSet::new();
    tags.push(arch_name);
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    tags.push(os);
    tags
}

/// Hashes the combined `--version` output of every tool this build will
/// invoke, so a toolchain upgrade invalidates every cache entry without
/// requiring the tools themselves to embed a build id in their own output
/// format. Missing tools are tolerated here (their absence surfaces as a
/// `tool-failure` once a task actually tries to run them).
fn toolchain_version_digest(env: &EnvConfig) -> String {
    let mut combined = Vec::new();
    for tool in [&env.tools.harec, &env.tools.qbe, &env.tools.r#as, &env.tools.ld, &env.tools.cc, &env.tools.ar] {
        combined.extend_from_slice(tool.as_bytes());
        if let Ok(out) = Command::new(tool).arg("--version").output() {
            combined.extend_from_slice(&out.stdout);
            combined.extend_from_slice(&out.stderr);
        }
        combined.push(0);
    }
    fingerprint::hash_bytes(&combined)
}

fn build_context(args: &BuildArgs, test: bool) -> Result<Context> {
    let env = EnvConfig::from_env()?;

    let arch_name = args.arch.clone().unwrap_or_else(|| arch::host_default().to_string());
    let (arch, platform) =
        arch::lookup(&arch_name).ok_or_else(|| DriverError::UnknownArchitecture(arch_name.clone()))?;

    let tags = match &args.tags {
        Some(s) => TagSet::parse_override(s)?,
        None => default_tags(&arch.name),
    };

    let search = SearchPath::parse(&env.search_path_var);
    let graph = resolver::resolve(&args.path, &search, &tags)?;

    let defines: BTreeMap<String, String> = args.defines.iter().cloned().collect();
    let jobs = args.jobs.unwrap_or_else(num_cpus::get);

    Ok(Context {
        toolchain_version_digest: toolchain_version_digest(&env),
        arch,
        platform,
        graph,
        namespace_override: args.namespace.clone(),
        test,
        submods: args.submods,
        freestanding: args.freestanding,
        libc_link: !args.freestanding,
        lib_search_paths: args.lib_search_paths.clone(),
        libs: args.libs.clone(),
        defines,
        env,
        build_type: args.build_type.into(),
        output: args.output.clone(),
        jobs,
    })
}

fn run_build(args: &BuildArgs, test: bool) -> Result<Option<PathBuf>> {
    let ctx = build_context(args, test)?;
    let mut graph = TaskGraph::build(&ctx);
    let report = scheduler::run(&ctx, &mut graph, ctx.jobs)?;

    tracing::info!(fresh = report.fresh, built = report.built, "build finished");

    let Some(artifact) = report.artifact else { return Ok(None) };

    let dest = match &ctx.output {
        Some(dest) => {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DriverError::io(e, parent))?;
            }
            std::fs::copy(&artifact, dest).map_err(|e| DriverError::io(e, dest))?;
            dest.clone()
        }
        None => artifact,
    };
    Ok(Some(dest))
}

fn execute_and_forward(path: &std::path::Path, extra_args: &[String]) -> Result<ExitCode> {
    let mut cmd = Command::new(path);
    cmd.args(extra_args);
    let status = cmd.status().map_err(|e| DriverError::io(e, path))?;
    match status.code() {
        Some(code) => Ok(ExitCode::from(code as u8)),
        None => Ok(ExitCode::FAILURE),
    }
}

fn print_error(err: &DriverError) {
    eprintln!("{}: {}: {err}", yansi::Paint::red("error").bold(), err.kind());
    if let DriverError::ToolFailure { log, .. } = err {
        if !log.is_empty() {
            eprintln!("{log}");
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        SubCmd::Build(a) | SubCmd::Run(a) | SubCmd::Test(a) => a.verbose,
        SubCmd::Cache(_) => 0,
    };
    init_tracing(verbose);

    if std::env::var_os(hare_build::config::env_vars::NO_COLOR).is_some() {
        yansi::Paint::disable();
    }

    let result = run(cli.command);
    match result {
        Ok(code) => code,
        Err(err) => {
            print_error(&err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(command: SubCmd) -> Result<ExitCode> {
    match command {
        SubCmd::Build(args) => {
            run_build(&args, false)?;
            Ok(ExitCode::SUCCESS)
        }
        SubCmd::Run(args) => {
            let run_args = args.run_args.clone();
            let Some(artifact) = run_build(&args, false)? else {
                return Err(DriverError::other("build produced no binary to run"));
            };
            execute_and_forward(&artifact, &run_args)
        }
        SubCmd::Test(args) => {
            let run_args = args.run_args.clone();
            let Some(artifact) = run_build(&args, true)? else {
                return Err(DriverError::other("build produced no binary to test"));
            };
            execute_and_forward(&artifact, &run_args)
        }
        SubCmd::Cache(cache_args) => {
            let env = EnvConfig::from_env()?;
            match cache_args.action {
                CacheAction::Size => {
                    let bytes = cache::size(&env.cache_root)?;
                    println!("{bytes}");
                    Ok(ExitCode::SUCCESS)
                }
                CacheAction::Clean => {
                    cache::clear(&env.cache_root)?;
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}
