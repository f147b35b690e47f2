use clap::Parser;

use camview::cli::{self, Args, Command, SessionArgs};
use camview::config::Config;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level().to_string()),
    )
    .init();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Some(Command::ListDevices { json }) => cli::list_devices(&config, json).await,
        Some(Command::Preview(session)) => cli::run_preview(&config, &session).await,
        Some(Command::Interactive(session)) => cli::run_interactive(&config, &session).await,
        Some(Command::Config { action }) => {
            cli::handle_config_action(action, &config, args.config.as_deref())
        }
        None => cli::run_interactive(&config, &SessionArgs::default()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
