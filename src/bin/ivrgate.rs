use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use ivrgate::{
    app::{self, AppStateBuilder},
    call::ivr_config::IvrConfig,
    config::{Config, ConfigStoreConfig},
    version,
};
use tokio::select;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Webhook-driven IVR call routing"
)]
struct Cli {
    /// Path to the configuration file
    #[clap(long, global = true, help = "Path to the configuration file (TOML format)")]
    conf: Option<String>,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit without starting the server
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.conf {
        println!("Loading config from: {}", path);
        Config::load(path)?
    } else {
        println!("Loading default config");
        Config::default()
    };
    println!("Start at {}", Utc::now());

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        return check_config(&config);
    }

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }

    let mut guard_holder = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        guard_holder = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }
    let _ = guard_holder; // keep the guard alive

    let state = AppStateBuilder::new().with_config(config).build().await?;
    info!(
        version = version::get_short_version(),
        "starting ivrgate on {}", state.config.http_addr
    );

    let token = state.token.clone();
    select! {
        r = app::run(state) => {
            r?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            token.cancel();
        }
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    if let Some(ref path) = config.default_ivr {
        IvrConfig::from_file(path)?;
        println!("default IVR config '{}' is valid", path);
    }
    if let ConfigStoreConfig::File { ref root } = config.config_store {
        let mut count = 0;
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                continue;
            }
            IvrConfig::from_file(&path)?;
            count += 1;
        }
        println!("{} tenant IVR configs in '{}' are valid", count, root);
    }
    config.http_addr.parse::<std::net::SocketAddr>()?;
    println!("Configuration is valid.");
    Ok(())
}
