use clap::Parser;
use guardia_collector::{config::read_config_file, manager::CollectorManager, storage::open_store};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("guardia_collector", level),
        ("collector", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    dotenv::dotenv().ok();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let store = open_store(&config.storage).await?;

    let mut manager = CollectorManager::initialize(config.clone(), store)?;
    manager.start().await?;

    #[cfg(feature = "api")]
    let api = match &config.api {
        Some(settings) => {
            let mut settings = settings.clone();
            if settings.auth_token.is_none() {
                settings.auth_token = guardia_collector::util::get_api_secret();
            }
            let state = guardia_collector::api::ApiState::new(manager.control());
            match guardia_collector::api::spawn_api_server(&settings, state).await {
                Ok((_, task)) => Some(task),
                Err(e) => {
                    error!("{e:#}");
                    manager.shutdown().await?;
                    return Err(e);
                }
            }
        }
        None => None,
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
    info!("shutting down");

    #[cfg(feature = "api")]
    {
        if let Some(task) = api {
            task.abort();
        }
    }

    manager.shutdown().await
}
