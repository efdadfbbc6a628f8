//! Entrypoint of the tsbench binary

use dotenvy::dotenv;

mod commands {
    pub(crate) mod block;
    pub(crate) mod blockgen;
    pub(crate) mod common;
    pub(crate) mod stream;
}
mod logging;

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "tsbench",
    version,
    about = "Synthetic time series block generator",
    long_about = r#"Synthetic time series block generator

Examples:
    # Plan a week of blocks for a small kubernetes-like workload and generate them
    tsbench block plan -p realistic-k8s-1w-small --labels 'cluster="one"' \
        | tsbench block gen --output-dir ./genblocks

    # Generate the blocks described by a config file and upload them
    tsbench blockgen --config-file blockgen.yaml --output-dir ./genblocks \
        --object-store-dir ./bucket --remove-local

    # Stream random series over the last 8 hours, one block per 2 hours
    tsbench stream --retention 8h --output-dir ./genblocks

    # Run with debug logging specified with LOG_FILTER
    LOG_FILTER=debug tsbench block gen --output-dir ./genblocks < plan.yaml
"#
)]
struct Config {
    #[clap(flatten)]
    logging_config: logging::LoggingConfig,

    /// Number of threads of the tokio runtime. Defaults to the number of CPUs.
    #[clap(long = "num-threads", env = "TSBENCH_NUM_THREADS", global = true)]
    num_threads: Option<usize>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Plan block specs from a profile, or generate blocks from block specs
    Block(commands::block::Config),

    /// Generate the blocks of a generator config, optionally uploading them
    Blockgen(commands::blockgen::Config),

    /// Stream random series into consecutive blocks
    Stream(commands::stream::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(n) = config.num_threads {
        builder.worker_threads(n.max(1));
    }
    let tokio_runtime = builder.enable_all().build()?;

    tokio_runtime.block_on(async move {
        let Some(command) = config.command else {
            println!("command required, -h/--help for help");
            return;
        };

        if let Err(e) = config.logging_config.install_global() {
            eprintln!("Initializing logs failed: {e:#}");
            std::process::exit(ReturnCode::Failure as _);
        }
        let cancel = commands::common::cancel_on_signal();

        match command {
            Command::Block(config) => {
                if let Err(e) = commands::block::command(config, cancel).await {
                    eprintln!("Block command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Command::Blockgen(config) => {
                if let Err(e) = commands::blockgen::command(config, cancel).await {
                    eprintln!("Blockgen command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Command::Stream(config) => {
                if let Err(e) = commands::stream::command(config, cancel).await {
                    eprintln!("Stream command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}
