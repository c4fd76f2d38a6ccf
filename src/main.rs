use clap::Parser;
use env_logger::Env;
use log::{error, info};

use fwharvest::cli::{Cli, Commands, Config};
use fwharvest::img4::NoCodec;
use fwharvest::update;
use fwharvest::Error;

fn run(cli: &Cli) -> Result<(), Error> {
    let config = Config::load(cli.config.as_deref())?;
    log::debug!("{:?}", config);

    // No LZFSE codec is linked in, compressed payloads get skipped with a warning
    let codec = NoCodec;

    match &cli.command {
        Commands::Update { source, dest } => {
            let manifest = update::update_firmware(source, dest, &config, &codec)?;
            info!("Done, {} entries", manifest.len());
        }
        Commands::List { source } => {
            for (name, file) in update::collect_all(source, &config, &codec)? {
                println!("{} ({} bytes)", name, file.len());
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
