use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rbakd",
    version,
    about = "Worker started by `rbak` to run commands on its host",
    long_about = "`rbakd` is started by `rbak`, locally or over a shell connection, and reads \
requests as JSON lines on stdin. Command output and the worker's own logs are sent back on \
stdout. It is not meant to be run by hand."
)]
struct Args {
    /// Print protocol version information as JSON and exit
    #[arg(long)]
    protocol_version: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of worker threads, 0 means number of cores
    #[arg(long, default_value = "0", value_name = "N")]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(long, default_value = "0", value_name = "N")]
    max_blocking_threads: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.protocol_version {
        println!("{}", common::version::ProtocolVersion::current().to_json()?);
        return Ok(());
    }
    let (layer, logs) = common::remote_tracing::RemoteTracingLayer::new();
    let output = common::OutputConfig {
        quiet: false,
        verbose: args.verbose,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    // stdout carries the protocol, logs travel inside it
    let tracing = common::TracingConfig {
        remote_layer: Some(layer),
        stdout: false,
    };
    let res = common::run(output, runtime, tracing, || async move {
        let result = remote::worker::server::serve_stdio(logs).await;
        if let Err(error) = &result {
            eprintln!("rbakd: {error:#}");
        }
        result
    });
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
