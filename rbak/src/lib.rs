//! `rbak` drives backups across a small set of hosts.
//!
//! A [`Script`] names the servers taking part, the directories to back up, which
//! server is the master (the source of truth) and the [`Method`] used to move data.
//! Running a script from any of its hosts resolves which server is local, then
//! backs up every directory from the master to each other server:
//!
//! ```text
//! Script ── ScriptScope ──┬── TargetScope(server) ── DirectoryScope(dir) ── Method::call
//!                         └── TargetScope(server) ── ...
//! ```
//!
//! Every layer carries event [`Hooks`] (`prepare`, `success`, `failure`, `finish`),
//! which is how rotation, pruning, mounting disks and similar chores are attached.

pub mod command;
pub mod config;
pub mod directory;
pub mod disk;
pub mod error;
pub mod methods;
pub mod prune;
pub mod rotate;
pub mod runner;
pub mod scope;
pub mod script;
pub mod server;

pub use command::{Chdir, Command};
pub use directory::Directory;
pub use error::{AbsolutePathError, BackupMethodError, ConfigurationError};
pub use methods::{Method, MethodRegistry};
pub use runner::Runner;
pub use scope::{ConnectionStringProvider, Runnable, Scope};
pub use script::Script;
pub use server::Server;

/// Event table carried by scripts, servers, directories and methods.
pub type Hooks = common::Controller<dyn Scope>;

/// Name of the CLI on remote hosts, used to change directory before running a command.
pub const RBAK_PROGRAM: &str = "rbak";

/// Log every failure and fold them into one error; a single failure is returned as is.
pub(crate) fn aggregate(results: Vec<anyhow::Result<()>>, what: &str) -> anyhow::Result<()> {
    let total = results.len();
    let mut errors: Vec<anyhow::Error> = results.into_iter().filter_map(Result::err).collect();
    for error in &errors {
        tracing::error!("{:#}", error);
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        failed => Err(anyhow::anyhow!(
            "{} of {} {} failed: {}",
            failed,
            total,
            what,
            errors
                .iter()
                .map(|error| format!("{error:#}"))
                .collect::<Vec<_>>()
                .join("; ")
        )),
    }
}
