//! `git-gic`: the thin binary wiring the library's components together.
//! Owns the CLI surface, logging setup, and process exit code; the library
//! itself never calls `std::process::exit` or reads `std::env::args`.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use git_gic::action::Action;
use git_gic::cli::Cli;
use git_gic::config::GicError;
use git_gic::context::GitContext;
use git_gic::dest_git::{DestGit, PatchTool, SystemDestGit, SystemPatchTool};
use git_gic::executor::Executor;
use git_gic::graph::build_git_graph;
use git_gic::patch_cache::PatchCache;
use git_gic::planner::{build_plan, PlanDirectives};
use git_gic::source_repo::{GitCliSourceRepo, SourceRepo};
use git_gic::state::{FileStateStore, StateStore};

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_target(false)
        .format_timestamp(None)
        .init();

    if let Err(err) = run(cli) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), GicError> {
    let git_binary = cli.git_binary.clone().unwrap_or_else(|| "git".to_string());
    let dest_git = SystemDestGit::new(git_binary.clone());
    let git_version = dest_git.version()?;

    let source_repo = GitCliSourceRepo::new(git_binary.clone(), &cli.source);

    let requested_refs: Option<HashSet<String>> = cli.requested_refs();
    let graph = build_git_graph(&source_repo, false, false, requested_refs)?;

    let state_dir = std::env::current_dir().map_err(|e| {
        GicError::Argument(format!("cannot determine launch directory: {e}"))
    })?;
    let state_store = FileStateStore::new(&state_dir);

    let mut ctx = GitContext::new(
        graph,
        cli.destination.clone(),
        cli.source.clone(),
        git_binary,
        git_version,
    );

    if let Some(cache_dir) = &cli.patch_cache {
        ctx.cache = PatchCache::load(cache_dir)?;
        ctx.cache_path = Some(cache_dir.clone());
        // Open Question (spec.md §4.5): whether `from_cache` tracks a
        // distinct flag from "a cache directory was given" is left
        // unresolved by the source; a supplied `--patch-cache` is treated
        // as an explicit request for the strict `ApplyCacheOrInterrupt`
        // recovery path rather than the best-effort one (see DESIGN.md).
        ctx.from_cache = true;
    }

    let executor = Executor::new(&state_store);

    if cli.resume {
        let saved = state_store
            .load()?
            .ok_or_else(|| GicError::Argument("no interrupted run to resume".to_string()))?;
        executor.resume(&mut ctx, &saved);
    } else {
        let directives = PlanDirectives {
            main_stream_anchor: cli.main_stream.clone(),
            breaks: cli.breaks.iter().cloned().collect(),
            skips: cli.skips.iter().cloned().collect(),
            insertions: cli.insertion_pairs(),
            src_remote_address: cli.source.clone(),
            dst_path: cli.destination.clone(),
        };
        ctx.actions = build_plan(&source_repo, &mut ctx.graph, &directives)?;
    }

    let patch_tool = SystemPatchTool;
    executor.run(&mut ctx, &dest_git, &patch_tool)?;

    if let Some(result_state_path) = &cli.result_state {
        write_result_state(result_state_path, &ctx.actions)?;
    }

    if ctx.interrupted {
        log::warn!("run interrupted; resume with --resume once resolved");
    } else {
        log::info!("done");
    }

    Ok(())
}

fn write_result_state(path: &PathBuf, actions: &[Action]) -> Result<(), GicError> {
    let json = serde_json::to_string_pretty(actions)
        .map_err(|e| GicError::Argument(format!("failed to serialize result state: {e}")))?;
    std::fs::write(path, json).map_err(|e| {
        GicError::Argument(format!("failed to write result state to {}: {e}", path.display()))
    })
}
