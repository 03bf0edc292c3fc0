//! Running scripts: every directory from the master to each other server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use remote::ProcessGroup;

use crate::scope::{ScriptScope, TargetScope};
use crate::{Scope, Script, Server};

const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Runs a set of scripts concurrently under one process group.
#[derive(Debug)]
pub struct Runner {
    scripts: Vec<Arc<Script>>,
}

impl Runner {
    #[must_use]
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: scripts.into_iter().map(Arc::new).collect(),
        }
    }

    /// Run every script; returns once all child processes are reaped.
    pub async fn call(&self) -> anyhow::Result<()> {
        let timer = std::time::Instant::now();
        tracing::info!("===== Starting backup at {} =====", chrono::Local::now().format(TIMESTAMP));
        let result = ProcessGroup::wait(|group| async move {
            let runs = self
                .scripts
                .iter()
                .map(|script| run_script(script.clone(), group.clone()));
            crate::aggregate(join_all(runs).await, "scripts")
        })
        .await;
        let elapsed = Duration::from_secs(timer.elapsed().as_secs());
        tracing::info!("[Time]: {}", humantime::format_duration(elapsed));
        tracing::info!("===== Finished backup at {} =====", chrono::Local::now().format(TIMESTAMP));
        result
    }
}

/// Run one script with children spawned in `group`.
pub async fn run_script(script: Arc<Script>, group: ProcessGroup) -> anyhow::Result<()> {
    let scope = Arc::new(ScriptScope::new(script, group)?);
    let result = run_scope(&scope).await;
    let closed = scope.close().await;
    result.and(closed)
}

async fn run_scope(scope: &Arc<ScriptScope>) -> anyhow::Result<()> {
    let script = scope.script();
    let master = scope.master().server();
    let current = scope.current().server();
    if script.running_on_master()? {
        tracing::info!("running on the master server {}", master.name);
    } else {
        tracing::info!("running on {}, the master is {}", current.name, master.name);
    }
    let outer: &dyn Scope = &**scope;
    let method = script.method();
    script
        .hooks
        .try_run(
            outer,
            master.hooks.try_run(
                outer,
                method.hooks().try_run(outer, async {
                    tracing::info!("running {} backups from {}", method.name(), current.name);
                    run_targets(scope).await
                }),
            ),
        )
        .await
}

async fn run_targets(scope: &Arc<ScriptScope>) -> anyhow::Result<()> {
    let master = scope.master().server();
    let targets = scope
        .script()
        .servers()
        .iter()
        .filter(|server| !Arc::ptr_eq(server, master))
        .map(|server| run_target(scope, server.clone()));
    crate::aggregate(join_all(targets).await, "target servers")
}

async fn run_target(scope: &Arc<ScriptScope>, server: Arc<Server>) -> anyhow::Result<()> {
    let target = Arc::new(scope.for_target(server.clone()));
    tracing::info!("===== Processing =====");
    tracing::info!("[Master]: {}", scope.master());
    tracing::info!("[Target]: {}", target.target_scope());
    let result = server
        .hooks
        .try_run(&*target, run_directories(&target))
        .await;
    let closed = target.target_scope().close().await;
    result
        .and(closed)
        .with_context(|| format!("backup to {} failed", server.name))
}

async fn run_directories(target: &Arc<TargetScope>) -> anyhow::Result<()> {
    let script = target.script();
    for directory in script.directories() {
        let scope = target.for_directory(directory.clone());
        tracing::info!("[Directory]: {}", directory);
        directory
            .hooks
            .try_run(&scope, script.method().call(&scope))
            .await?;
    }
    Ok(())
}
