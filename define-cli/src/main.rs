//! # Define CLI
//!
//! Checks identity tables and runs a demo session.

use clap::Parser;
use define_cli::demo::{self, DemoOptions};
use define_cli::{load_table, CliArgs, Command, TableReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,define_core=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    // Use JSON format in production (RUST_LOG_FORMAT=json)
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = CliArgs::parse();
    let config = args.registry_config();

    match args.command {
        Command::Check { table } => {
            let report = TableReport::from_table(&load_table(&table)?);
            print!("{report}");
            if !report.is_clean() {
                anyhow::bail!("{} has problems", table.display());
            }
        }
        Command::Demo { table, manual } => {
            let table = table.as_deref().map(load_table).transpose()?;
            let options = DemoOptions {
                config,
                table,
                manual,
            };
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            for (tick, transcript) in rt.block_on(demo::run(options))?.iter().enumerate() {
                println!("# tick {}", tick + 1);
                println!("{}", transcript.compact);
                println!("{}", transcript.pretty);
            }
        }
    }

    Ok(())
}
