//! vigil: keyword-driven message routing from Telegram channels and RSS
//! feeds to webhooks and chats.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use vigil_core::config::{load_route_table, DestinationKind};
use vigil_core::envelope::EnvelopeSink;
use vigil_core::metrics::MetricsCollector;
use vigil_core::ratelimit::RateLimiter;
use vigil_core::route::Router;
use vigil_daemon::dispatch::{Dispatch, Senders};
use vigil_daemon::orchestrator::{Orchestrator, StatePaths};
use vigil_daemon::retry::RetryQueue;
use vigil_daemon::session::connect_chat;
use vigil_rss::{FeedCursorLog, FeedPoller};
use vigil_telegram::{ChatClient, ChatCursorLog, ChatSender, ChatSource};
use vigil_webhook::WebhookSender;

/// Cadence of the periodic metrics snapshot.
const METRICS_SAVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "vigil",
    version,
    about = "Keyword-driven message routing from Telegram and RSS to webhooks and chats"
)]
struct Cli {
    /// Path to the configuration document.
    #[arg(long, global = true, default_value = "config/vigil.json")]
    config: PathBuf,

    /// Base directory for cursors, attachments and metrics.
    #[arg(long, global = true, default_value = "tmp")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the routing pipeline.
    Monitor {
        /// Which source families to start.
        #[arg(long, value_enum, default_value_t = SourceFilter::All)]
        sources: SourceFilter,
    },
    /// Enumerate accessible chat entities.
    Discover {
        /// Diff accessible entities against the configured channels.
        #[arg(long)]
        diff: bool,
        /// Write a config skeleton covering every accessible channel.
        #[arg(long, conflicts_with = "diff")]
        generate: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceFilter {
    All,
    Chat,
    Feed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Monitor { sources } => monitor(&cli.config, &cli.state_dir, sources).await,
        Command::Discover { diff, generate } => {
            vigil_daemon::discover::run(&cli.config, diff, generate).await
        }
    }
}

async fn monitor(
    config_path: &PathBuf,
    state_dir: &PathBuf,
    sources: SourceFilter,
) -> anyhow::Result<()> {
    let table = Arc::new(load_route_table(config_path).context("loading configuration")?);
    let paths = StatePaths::new(state_dir);
    paths.purge_attachments();

    let metrics = Arc::new(MetricsCollector::new(paths.metrics_file()));
    let limiter = Arc::new(RateLimiter::new());
    let retry = Arc::new(RetryQueue::new(Arc::clone(&metrics)));

    let want_chat_source = sources != SourceFilter::Feed && !table.channel_keys().is_empty();
    let want_feeds = sources != SourceFilter::Chat && !table.feeds().is_empty();
    let has_chat_destination = table
        .destinations()
        .iter()
        .any(|d| d.kind == DestinationKind::Chat);

    // One session covers both the chat source and chat destinations.
    let chat_client: Option<Arc<dyn ChatClient>> = if want_chat_source || has_chat_destination {
        Some(Arc::new(connect_chat().await?))
    } else {
        None
    };

    let senders = Arc::new(Senders {
        webhook: WebhookSender::new(Arc::clone(&limiter), Arc::clone(&metrics)),
        chat: chat_client.as_ref().map(|client| {
            Arc::new(ChatSender::new(
                Arc::clone(client),
                Arc::clone(&limiter),
                Arc::clone(&metrics),
            ))
        }),
    });
    let dispatch: Arc<dyn Dispatch> = senders;

    let orchestrator = Arc::new(Orchestrator::new(
        Router::new(Arc::clone(&table)),
        Arc::clone(&metrics),
        Arc::clone(&retry),
        Arc::clone(&dispatch),
        paths.attachments(),
    ));
    let sink: Arc<dyn EnvelopeSink> = orchestrator;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    let mut chat_source = None;
    if want_chat_source {
        let client = chat_client.clone().expect("chat session connected above");
        let keys = table.channel_keys();
        let source = Arc::new(
            ChatSource::connect(
                client,
                ChatCursorLog::new(paths.telegramlog()),
                Arc::clone(&metrics),
                &keys,
            )
            .await,
        );
        source.startup_proof().await;

        for channel in source.channels().to_vec() {
            let source = Arc::clone(&source);
            let sink = Arc::clone(&sink);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                source.run_gap_recovery(channel, sink, shutdown).await;
            }));
        }
        {
            let source = Arc::clone(&source);
            let sink = Arc::clone(&sink);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                source.run_events(sink, shutdown).await;
            }));
        }
        chat_source = Some(source);
    }

    if want_feeds {
        let poller = Arc::new(FeedPoller::new(
            FeedCursorLog::new(paths.rsslog()),
            Arc::clone(&sink),
        ));
        for feed in table.feeds().to_vec() {
            let poller = Arc::clone(&poller);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                poller.run(feed, shutdown).await;
            }));
        }
    }

    {
        let retry = Arc::clone(&retry);
        let dispatch = Arc::clone(&dispatch);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            retry.run(dispatch, shutdown).await;
        }));
    }

    {
        let metrics = Arc::clone(&metrics);
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(METRICS_SAVE_INTERVAL) => metrics.save(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    info!("vigil is monitoring");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    for task in tasks {
        let _ = task.await;
    }
    if let Some(source) = chat_source {
        source.shutdown();
    }
    metrics.save();
    info!("shutdown complete");
    Ok(())
}
