//! The task graph: one task per (module, stage) plus a final `BIN` link
//! task, connected by prerequisite edges and sorted so all `SSA` tasks
//! precede all `S`, which precede all `O`, which precede `BIN`.

use crate::{
    context::{BuildType, Context},
    error::DriverError,
    stage::Stage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub module: usize,
    pub stage: Stage,
    pub prereqs: Vec<usize>,
    pub status: TaskStatus,
    pub fingerprint: Option<String>,
    pub output: Option<std::path::PathBuf>,
}

pub struct TaskGraph {
    pub tasks: Vec<Task>,
    /// Index of the task whose output is the build's final product: the
    /// synthesized `BIN` link task for a binary build, or the root module's
    /// `S`/`O` task when `--type` asks for an intermediate artifact instead
    /// (§6).
    pub final_task: usize,
    /// The first tool-failure or I/O error observed by the scheduler, held
    /// here so the main loop can surface it once every running task has
    /// drained.
    pub failure: Option<DriverError>,
}

impl TaskGraph {
    pub fn build(ctx: &Context) -> Self {
        let n = ctx.graph.modules.len();
        let need_o = matches!(ctx.build_type, BuildType::Object | BuildType::Binary);
        let need_bin = matches!(ctx.build_type, BuildType::Binary);

        // One SSA/S task per module (every stage downstream of SSA needs at
        // least assembly), plus O per module and a final BIN task only when
        // the requested build type needs them. Indices are fixed per-module
        // for easy prerequisite lookups before the final scan-order sort.
        let mut tasks = Vec::with_capacity(n * 3 + 1);
        let ssa_base = 0;
        let s_base = n;
        let o_base = 2 * n;
        let bin_idx = 3 * n;

        for (i, module) in ctx.graph.modules.iter().enumerate() {
            let ssa_prereqs: Vec<usize> =
                module.deps.iter().map(|(dep_idx, _)| ssa_base + dep_idx).collect();
            tasks.push(Task {
                module: i,
                stage: Stage::Ssa,
                prereqs: ssa_prereqs,
                status: TaskStatus::Pending,
                fingerprint: None,
                output: None,
            });
        }
        for i in 0..n {
            tasks.push(Task {
                module: i,
                stage: Stage::S,
                prereqs: vec![ssa_base + i],
                status: TaskStatus::Pending,
                fingerprint: None,
                output: None,
            });
        }
        if need_o {
            for i in 0..n {
                tasks.push(Task {
                    module: i,
                    stage: Stage::O,
                    prereqs: vec![s_base + i],
                    status: TaskStatus::Pending,
                    fingerprint: None,
                    output: None,
                });
            }
        }
        if need_bin {
            tasks.push(Task {
                module: ctx.graph.root,
                stage: Stage::Bin,
                prereqs: (0..n).map(|i| o_base + i).collect(),
                status: TaskStatus::Pending,
                fingerprint: None,
                output: None,
            });
        }

        // Re-sort by scan rank (SSA, S, O, BIN), remapping prerequisite
        // indices to match. Within a rank, preserve the per-module order
        // already established above, which is itself the resolver's
        // topological order (leaves first).
        let mut order: Vec<usize> = (0..tasks.len()).collect();
        order.sort_by_key(|&i| (tasks[i].stage.scan_rank(), i));

        let mut old_to_new = vec![0usize; tasks.len()];
        for (new_idx, &old_idx) in order.iter().enumerate() {
            old_to_new[old_idx] = new_idx;
        }

        let sorted: Vec<Task> = order
            .iter()
            .map(|&old_idx| {
                let mut t = tasks[old_idx].clone();
                t.prereqs = t.prereqs.iter().map(|&p| old_to_new[p]).collect();
                t
            })
            .collect();

        let final_task = if need_bin {
            old_to_new[bin_idx]
        } else if need_o {
            old_to_new[o_base + ctx.graph.root]
        } else {
            old_to_new[s_base + ctx.graph.root]
        };

        Self { tasks: sorted, final_task, failure: None }
    }

    pub fn ready(&self) -> Option<usize> {
        self.tasks.iter().position(|t| {
            t.status == TaskStatus::Pending && t.prereqs.iter().all(|&p| self.tasks[p].status == TaskStatus::Done)
        })
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    pub fn any_running(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Running)
    }

    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EnvConfig,
        context::{Arch, BuildType, Platform},
        resolver::{Graph, Module},
        tags::TagSet,
    };
    use std::{collections::BTreeMap, path::PathBuf};

    fn module(ident: &str, deps: Vec<(usize, &str)>) -> Module {
        Module {
            ident: crate::ident::ModuleIdent::parse(ident).unwrap(),
            path: PathBuf::from(ident),
            namespace: crate::ident::ModuleIdent::parse(ident).unwrap().namespace(),
            sources: Default::default(),
            deps: deps
                .into_iter()
                .map(|(i, id)| (i, crate::ident::ModuleIdent::parse(id).unwrap()))
                .collect(),
        }
    }

    fn test_ctx() -> Context {
        let lib = module("lib", vec![]);
        let app = module("app", vec![(0, "lib")]);
        let graph = Graph { modules: vec![lib, app], root: 1 };
        Context {
            arch: Arch { name: "x86_64".into(), backend_name: "qbe-amd64".into() },
            platform: Platform::default(),
            graph,
            namespace_override: None,
            test: false,
            submods: false,
            freestanding: false,
            libc_link: true,
            lib_search_paths: vec![],
            libs: vec![],
            defines: BTreeMap::new(),
            toolchain_version_digest: "digest".into(),
            env: EnvConfig::from_getter(|_| None).unwrap(),
            build_type: BuildType::Binary,
            output: None,
            jobs: 1,
        }
    }

    #[test]
    fn ssa_tasks_sort_before_later_stages() {
        let graph = TaskGraph::build(&test_ctx());
        let ranks: Vec<u8> = graph.tasks.iter().map(|t| t.stage.scan_rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn ssa_app_depends_on_ssa_lib() {
        let tg = TaskGraph::build(&test_ctx());
        let ssa_lib = tg.tasks.iter().position(|t| t.stage == Stage::Ssa && t.module == 0).unwrap();
        let ssa_app = tg.tasks.iter().position(|t| t.stage == Stage::Ssa && t.module == 1).unwrap();
        assert!(tg.tasks[ssa_app].prereqs.contains(&ssa_lib));
    }

    #[test]
    fn bin_depends_on_every_object() {
        let tg = TaskGraph::build(&test_ctx());
        let o_tasks: Vec<usize> =
            tg.tasks.iter().enumerate().filter(|(_, t)| t.stage == Stage::O).map(|(i, _)| i).collect();
        for o in o_tasks {
            assert!(tg.tasks[tg.final_task].prereqs.contains(&o));
        }
    }

    #[test]
    fn ready_respects_prerequisites() {
        let mut tg = TaskGraph::build(&test_ctx());
        let ssa_lib = tg.tasks.iter().position(|t| t.stage == Stage::Ssa && t.module == 0).unwrap();
        let ssa_app = tg.tasks.iter().position(|t| t.stage == Stage::Ssa && t.module == 1).unwrap();

        // Only SSA(lib) is ready at the start; SSA(app) needs it done first.
        let first_ready = tg.ready().unwrap();
        assert_eq!(first_ready, ssa_lib);

        tg.tasks[ssa_lib].status = TaskStatus::Done;
        let next_ready = tg.ready().unwrap();
        assert_eq!(next_ready, ssa_app);
    }
}
