use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rbak::prune::policy::Period;
use rbak::prune::{Keep, PeriodicPolicy, PruneSettings};
use rbak::rotate::{RotateError, RotateSettings};
use rbak::{MethodRegistry, Runner};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rbak",
    version,
    about = "Run backup scripts and manage backup rotations",
    long_about = "`rbak` runs backup scripts: every directory of a script is copied from the master \
server to each other server, using rsync, scp or zfs. Hooks around each step rotate snapshots, \
prune old rotations and mount backup disks with the helper subcommands below.

EXAMPLE:
    # Back up with a script and report progress
    rbak -v run /etc/rbak/laptop.yaml

    # In the backup root: turn the snapshot into a rotation, then thin out old ones
    rbak --root /backup/laptop rotate
    rbak --root /backup/laptop prune --keep old --dry"
)]
struct Args {
    /// Change to this directory before doing anything else
    #[arg(long, global = true, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help_heading = "Output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Output")]
    quiet: bool,

    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run backup scripts
    Run {
        /// YAML script files, run concurrently
        #[arg(required = true)]
        scripts: Vec<PathBuf>,
    },
    /// Run a command in the --root directory (used to run commands on remote hosts)
    Spawn {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },
    /// Rename the snapshot to a timestamped rotation and point `latest` at it
    Rotate {
        /// Rotation name, with strftime expansions of the current UTC time
        #[arg(long, default_value = rbak::rotate::BACKUP_NAME)]
        format: String,
        /// Name of the symlink to the latest rotation
        #[arg(long, default_value = rbak::methods::snapshot::LATEST_NAME)]
        latest: String,
        /// Name of the in-progress snapshot
        #[arg(long, default_value = rbak::methods::snapshot::SNAPSHOT_NAME)]
        snapshot: String,
    },
    /// Erase old rotations, keeping a number of them per period
    Prune {
        /// Hourly rotations to keep
        #[arg(long, default_value = "24")]
        hourly: usize,
        /// Daily rotations to keep
        #[arg(long, default_value = "28")]
        daily: usize,
        /// Weekly rotations to keep
        #[arg(long, default_value = "52")]
        weekly: usize,
        /// Monthly rotations to keep
        #[arg(long, default_value = "36")]
        monthly: usize,
        /// Quarterly rotations to keep
        #[arg(long, default_value = "40")]
        quarterly: usize,
        /// Yearly rotations to keep
        #[arg(long, default_value = "20")]
        yearly: usize,
        /// Rotation name format, with strftime expansions
        #[arg(long, default_value = rbak::rotate::BACKUP_NAME)]
        format: String,
        /// Name of the symlink to the latest rotation, which is never erased
        #[arg(long, default_value = rbak::methods::snapshot::LATEST_NAME)]
        latest: String,
        /// Keep the older or the newer rotation within one period
        #[arg(long, value_enum, default_value_t = Keep::Old)]
        keep: Keep,
        /// Print what would be erased without erasing it
        #[arg(long)]
        dry: bool,
    },
    /// Mount a backup disk
    Mount {
        /// Mountpoint, created if missing
        path: PathBuf,
        /// Disk label (Linux) or volume name (macOS)
        name: Option<String>,
    },
    /// Unmount a backup disk
    Unmount { path: PathBuf },
}

async fn run_scripts(args: &Args, paths: Vec<PathBuf>) -> Result<()> {
    let worker_config = remote::protocol::WorkerConfig {
        verbose: args.verbose,
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    // host resolution may block on DNS
    let scripts = tokio::task::spawn_blocking(move || {
        let loader = rbak::config::Loader {
            registry: MethodRegistry::default(),
            resolver: Arc::new(remote::SystemResolver::new()),
            worker_config,
        };
        paths
            .iter()
            .map(|path| loader.load(path))
            .collect::<Result<Vec<_>>>()
    })
    .await??;
    Runner::new(scripts).call().await
}

async fn async_main(args: Args) -> Result<i32> {
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    match args.command.clone() {
        Command::Run { scripts } => run_scripts(&args, scripts).await?,
        Command::Spawn { argv } => return Ok(spawn(&argv)),
        Command::Rotate {
            format,
            latest,
            snapshot,
        } => {
            let settings = RotateSettings {
                format,
                latest,
                snapshot,
            };
            match rbak::rotate::rotate(&cwd, &settings, chrono::Utc::now()).await {
                Ok(rotated) => tracing::info!("rotated to {:?}", rotated),
                Err(error) => match error.downcast_ref::<RotateError>() {
                    Some(rotate_error) => {
                        tracing::error!("{}", rotate_error);
                        return Ok(rotate_error.exit_code());
                    }
                    None => return Err(error),
                },
            }
        }
        Command::Prune {
            hourly,
            daily,
            weekly,
            monthly,
            quarterly,
            yearly,
            format,
            latest,
            keep,
            dry,
        } => {
            let policy = PeriodicPolicy {
                counts: vec![
                    (Period::Hourly, hourly),
                    (Period::Daily, daily),
                    (Period::Weekly, weekly),
                    (Period::Monthly, monthly),
                    (Period::Quarterly, quarterly),
                    (Period::Yearly, yearly),
                ],
            };
            let settings = PruneSettings {
                format,
                latest,
                keep,
                dry,
            };
            let plan = rbak::prune::prune(&cwd, &settings, &policy).await?;
            if dry {
                println!("*** Pruning backups (dry run) ***");
                print!("{plan}");
            } else {
                tracing::info!(
                    "kept {} rotation(s), erased {}",
                    plan.retain.len(),
                    plan.erase.len()
                );
            }
        }
        Command::Mount { path, name } => rbak::disk::mount(&path, name.as_deref()).await?,
        Command::Unmount { path } => rbak::disk::unmount(&path).await?,
    }
    Ok(0)
}

/// Replace this process with `argv`; only returns if that failed.
fn spawn(argv: &[String]) -> i32 {
    use std::os::unix::process::CommandExt;
    let Some((program, args)) = argv.split_first() else {
        eprintln!("rbak spawn: no command given");
        return 2;
    };
    let error = std::process::Command::new(program).args(args).exec();
    eprintln!("rbak spawn: failed to run {program:?}: {error}");
    127
}

fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(root) = &args.root {
        std::env::set_current_dir(root)
            .with_context(|| format!("cannot change directory to {root:?}"))?;
    }
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    match common::run(output, runtime, common::TracingConfig::default(), func) {
        Some(0) => Ok(()),
        Some(code) => std::process::exit(code),
        None => std::process::exit(1),
    }
}
