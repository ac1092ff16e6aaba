use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Context, Result};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::format::{Compact, DefaultFields};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::{Config, Settings},
    eventsub::EventSubMonitor,
    live::LiveMonitor,
    notify::{
        registry::{ChannelRegistry, Matching},
        Notifier,
    },
    sink::{threads::ThreadsSink, twitter::TwitterSink, PostSink},
    twitch::Endpoints,
    youtube::Prober,
};

mod config;
mod eventsub;
mod live;
mod notify;
mod preview;
mod sink;
#[cfg(test)]
mod testing;
mod twitch;
mod youtube;

/// Time given to in-flight posts on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Log to file
    #[arg(short, long)]
    log_file: Option<String>,
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Watch all channels and post notifications (default)
    #[default]
    Run,
    /// Render the configured templates with sample data
    Preview,
    /// Send a test message through one sink
    TestPost {
        #[arg(long, value_enum, default_value_t = SinkKind::Twitter)]
        sink: SinkKind,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    Twitter,
    Threads,
}

fn get_layer<S>(
    layer: tracing_subscriber::fmt::Layer<S>,
) -> tracing_subscriber::fmt::Layer<
    S,
    DefaultFields,
    tracing_subscriber::fmt::format::Format<Compact, ChronoLocal>,
> {
    layer
        .with_timer(ChronoLocal::new("%v %k:%M:%S %z".to_owned()))
        .compact()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    color_eyre::install()?;

    let log_level = std::env::var("LOG").unwrap_or("info".to_owned());
    let tracing_opts = tracing_subscriber::registry()
        .with(EnvFilter::new(format!("live_notifier={log_level}")))
        .with(get_layer(tracing_subscriber::fmt::layer()));

    let _guard = match &args.log_file {
        Some(path) => {
            let (non_blocking, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(".", path));
            tracing_opts
                .with(
                    get_layer(tracing_subscriber::fmt::layer())
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_opts.init();
            None
        }
    };

    match args.command.unwrap_or_default() {
        Command::Run => {
            let config = Config::from_settings(&args.settings).context("Invalid configuration")?;
            let prober = Prober::new().context("Building youtube client")?;
            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));
            run(config, Endpoints::default(), prober, cancel).await
        }
        Command::Preview => {
            let templates = args.settings.templates().context("Invalid template")?;
            let previews = preview::previews(&templates).context("Rendering templates")?;
            preview::print(&previews);
            Ok(())
        }
        Command::TestPost { sink, yes } => {
            let client = reqwest::Client::new();
            let sink: Arc<dyn PostSink> = match sink {
                SinkKind::Twitter => Arc::new(TwitterSink::new(
                    client,
                    args.settings
                        .twitter_auth()
                        .context("Twitter credentials")?,
                )),
                SinkKind::Threads => {
                    let Some(threads) = args.settings.threads() else {
                        return Err(eyre!(
                            "THREADS_ACCESS_TOKEN and THREADS_USER_ID must both be set"
                        ));
                    };
                    Arc::new(ThreadsSink::new(
                        client,
                        threads.user_id,
                        threads.access_token,
                    ))
                }
            };
            preview::test_post(sink, yes).await
        }
    }
}

fn notifier(client: &reqwest::Client, config: &Config) -> Notifier {
    let primary: Arc<dyn PostSink> =
        Arc::new(TwitterSink::new(client.clone(), config.twitter.clone()));
    let secondary = config.threads.as_ref().map(|threads| {
        Arc::new(ThreadsSink::new(
            client.clone(),
            threads.user_id.clone(),
            threads.access_token.clone(),
        )) as Arc<dyn PostSink>
    });
    info!(
        threads = secondary.is_some(),
        "Posting to twitter{}",
        if secondary.is_some() { " and threads" } else { "" }
    );
    Notifier::new(primary, secondary, config.templates.clone())
}

/// Runs both monitors until `cancel` fires, then stops twitch, youtube and the pending posts in
/// that order.
async fn run(
    config: Config,
    endpoints: Endpoints,
    prober: Prober,
    cancel: CancellationToken,
) -> Result<()> {
    let client = reqwest::Client::new();
    let notifier = notifier(&client, &config);

    let eventsub = EventSubMonitor::new(
        client,
        endpoints,
        config.twitch.clone(),
        Arc::new(ChannelRegistry::new(
            &config.twitch.channels,
            config.profiles.clone(),
            Matching::IgnoreCase,
        )),
        notifier.clone(),
        &cancel,
    );
    info!(channels = %config.twitch.channels.join(", "), "Starting twitch monitor");
    if let Err(err) = eventsub.start().await {
        eventsub.stop().await;
        if err.is_cancelled() {
            info!("Stopped before the twitch monitor was ready");
            return Ok(());
        }
        return Err(err).context("Starting twitch monitor");
    }

    let live = LiveMonitor::new(
        &config.youtube,
        prober,
        Arc::new(ChannelRegistry::new(
            &config.youtube.channels,
            config.profiles.clone(),
            Matching::Exact,
        )),
        notifier.clone(),
    );
    let live = tokio::spawn(live.run(cancel.child_token()));

    info!("Everything ok, waiting for streams");
    cancel.cancelled().await;

    eventsub.stop().await;
    if let Err(err) = live.await {
        error!("YouTube monitor task failed: {err}");
    }
    notifier.shutdown(SHUTDOWN_GRACE).await;
    info!("Stopped");
    Ok(())
}

/// Cancels `cancel` on Ctrl+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }
    info!("Shutting down");
    cancel.cancel();
}
