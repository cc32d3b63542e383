use anyhow::{Context, Result};
use std::{env, time::Instant};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};
use train::{args::Args, config::Config};

pub fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse arguments
    let args = Args::from_args();
    let config = Config::open(&args.config)
        .with_context(|| format!("failed to load config file '{}'", args.config.display()))?;

    // start training program
    let start = Instant::now();
    train::start(args, config)?;
    info!("done in {:.2} hours", start.elapsed().as_secs_f64() / 3600.0);

    Ok(())
}
