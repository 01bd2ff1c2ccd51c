use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::{signal, sync::mpsc, sync::watch};
use tracing::{error, info, warn};

use storefront_sync as sync;
use sync::message_queue::{InMemoryMessageQueue, MessageQueue};
use sync::models::{SyncMode, SyncOrigin};
use sync::repositories::{SeaOrmSyncStore, SyncStore};
use sync::services::{
    BackfillOptions, BatchMigrationCoordinator, CustomerSync, LivePoller, OrderSyncCoordinator,
    SyncWorker, ZoneSync,
};
use sync::storefront::{StorefrontClient, WooClient};

#[derive(Debug, Parser)]
#[command(name = "storefront-sync", version, about = "Storefront order sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Webhook endpoint, sync worker and live poller.
    Serve {
        #[arg(long, default_value_t = 300)]
        poll_interval_secs: u64,
    },
    /// Historical backfill from the checkpoint.
    Backfill {
        #[arg(long)]
        start_page: Option<u32>,
        #[arg(long)]
        max_pages: Option<u32>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// One pass over recently modified orders.
    Poll,
    /// Fetch and sync a single order.
    SyncOrder { id: i64 },
    /// Mirror storefront delivery areas into territories.
    SyncZones,
    /// Pull storefront customer accounts with their addresses.
    SyncCustomers {
        #[arg(long, default_value_t = 1)]
        start_page: u32,
        #[arg(long)]
        max_pages: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = sync::config::load_config().context("failed to load configuration")?;
    sync::config::init_tracing(&cfg.log_level, cfg.log_json);

    let db = sync::db::establish_connection_from_app_config(&cfg).await?;
    sync::db::check_connection(&db).await?;
    if cfg.auto_migrate {
        sync::db::run_migrations(&db).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let store: Arc<dyn SyncStore> = Arc::new(SeaOrmSyncStore::new(Arc::new(db)));
    let client: Arc<dyn StorefrontClient> = Arc::new(
        WooClient::new(&cfg.storefront).context("failed to build storefront client")?,
    );

    let (event_tx, event_rx) = mpsc::channel(1024);
    let events = sync::events::EventSender::new(event_tx);
    tokio::spawn(sync::events::process_events(event_rx));

    let coordinator = OrderSyncCoordinator::new(store.clone(), &cfg).with_events(events.clone());

    match cli.command {
        Command::Serve { poll_interval_secs } => {
            if cfg.webhook_secret.is_none() {
                if cfg.is_production() {
                    anyhow::bail!("webhook_secret must be set in production");
                }
                warn!("webhook_secret is not set; every webhook will be rejected");
            }
            let queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new());
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let mut workers = Vec::new();
            for _ in 0..cfg.sync.workers.max(1) {
                let worker = SyncWorker::new(queue.clone(), client.clone(), coordinator.clone());
                workers.push(tokio::spawn(worker.run(shutdown_rx.clone())));
            }
            let poller = LivePoller::new(client.clone(), coordinator.clone(), &cfg);
            workers.push(tokio::spawn(
                poller.run(Duration::from_secs(poll_interval_secs), shutdown_rx.clone()),
            ));

            sync::handlers::health::init_start_time();
            let state = sync::AppState::new(store.clone(), queue, cfg.webhook_secret.clone());
            let app = sync::router(state);

            let host: std::net::IpAddr = cfg
                .host
                .parse()
                .with_context(|| format!("invalid host {}", cfg.host))?;
            let addr = SocketAddr::from((host, cfg.port));
            info!("storefront-sync listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            let _ = shutdown_tx.send(true);
            for handle in workers {
                if let Err(e) = handle.await {
                    error!("background task failed: {}", e);
                }
            }
        }
        Command::Backfill {
            start_page,
            max_pages,
            workers,
        } => {
            let mut options = BackfillOptions::from_config(&cfg);
            options.start_page = start_page;
            options.max_pages = max_pages.or(options.max_pages);
            options.workers = workers.unwrap_or(options.workers).max(1);

            let report = BatchMigrationCoordinator::new(client, coordinator, &cfg)
                .with_events(events)
                .run(options)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Poll => {
            let report = LivePoller::new(client, coordinator, &cfg).poll_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SyncOrder { id } => {
            let order = client.fetch_order(id).await?;
            let report = coordinator
                .sync_order(&order, SyncOrigin::Poll, SyncMode::Live)
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SyncZones => {
            let areas = client.fetch_delivery_areas().await?;
            let report = ZoneSync::new(store).sync_zones(&areas).await?;
            info!(
                created = report.created,
                updated = report.updated,
                ignored = report.ignored,
                "Zone sync done"
            );
        }
        Command::SyncCustomers {
            start_page,
            max_pages,
        } => {
            let report = CustomerSync::from_config(client, store, &cfg)
                .sync_all(start_page, max_pages)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
