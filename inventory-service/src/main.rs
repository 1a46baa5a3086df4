use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use diesel::PgConnection;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

use anyhow::Result;
use clap::Parser;
use diesel::Connection;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use inventory_service::api;
use inventory_service::config::{Config, StoreKind};
use inventory_service::grpc;
use inventory_service::handlers::CommandHandler;
use inventory_service::shutdown::{cancel_on_signal, join_background};
use inventory_service::outbox::OutboxProcessor;
use inventory_service::store::{InventoryStore, MemoryInventoryStore, PgInventoryStore};
use inventory_service::sweeper::ExpirySweeper;
use inventory_service::ReservationCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = Config::parse();

    let store: Arc<dyn InventoryStore> = match config.store {
        StoreKind::Postgres => {
            // Run migrations first
            info!("Running database migrations...");
            let mut conn = PgConnection::establish(&config.database_url)?;
            conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
            info!("Migrations completed successfully");

            Arc::new(PgInventoryStore::connect(&config.database_url, config.database_pool_size).await?)
        }
        StoreKind::Memory => {
            warn!("Using in-memory store; reservations will not survive a restart");
            Arc::new(MemoryInventoryStore::new())
        }
    };

    let coordinator = Arc::new(ReservationCoordinator::new(store.clone(), config.reservation_settings()));
    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    let sweeper = ExpirySweeper::new(coordinator.clone(), config.sweep_interval()).start(shutdown.clone());

    if config.kafka_enabled {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", "inventory-service")
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .create()?;

        consumer.subscribe(&[&config.command_topic])?;

        let outbox_processor = OutboxProcessor::new(store.clone(), producer.clone(), config.event_topic.clone());
        let command_handler = CommandHandler::new(coordinator.clone(), producer.clone(), config.reply_topic.clone());

        let token = shutdown.clone();
        background.push(("outbox processor", tokio::spawn(async move {
            outbox_processor.run(token).await;
        })));

        let token = shutdown.clone();
        background.push(("command handler", tokio::spawn(async move {
            command_handler.run(consumer, token).await;
        })));
    } else {
        warn!("Kafka disabled; commands are not consumed and events stay in the outbox");
    }

    let grpc_task = grpc::spawn_grpc(coordinator.clone(), config.grpc_addr(), shutdown.clone());

    let app = api::create_router(api::AppState { coordinator: coordinator.clone() });
    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;

    info!("Inventory service web server started on {}", config.http_addr());
    info!("Inventory service gRPC server started on {}", config.grpc_addr());

    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    let http_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_token.cancelled().await })
        .await;
    shutdown.cancel();

    match grpc_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("gRPC server failed: {}", e),
        Err(e) => error!("gRPC server task panicked: {}", e),
    }

    sweeper.shutdown().await;
    join_background(background).await;

    info!("Inventory service stopped");
    served?;
    Ok(())
}
