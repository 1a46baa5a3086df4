use anyhow::Result;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use shared::*;

use crate::coordinator::{ReservationCoordinator, ReserveItem, ReserveRequest};
use crate::error::ReservationError;

/// Consumes reservation commands from Kafka and answers on the reply topic.
pub struct CommandHandler {
    coordinator: Arc<ReservationCoordinator>,
    producer: FutureProducer,
    reply_topic: String,
}

impl CommandHandler {
    pub fn new(coordinator: Arc<ReservationCoordinator>, producer: FutureProducer, reply_topic: String) -> Self {
        Self { coordinator, producer, reply_topic }
    }

    pub async fn run(&self, consumer: StreamConsumer, shutdown: CancellationToken) {
        let mut message_stream = consumer.stream();

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = message_stream.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => match serde_json::from_str::<Command>(json_str) {
                                Ok(command) => {
                                    if let Err(e) = self.handle_command(command).await {
                                        error!("Error handling command: {}", e);
                                    }
                                }
                                Err(e) => warn!("Skipping malformed command: {}", e),
                            },
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, rdkafka::consumer::CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }

        info!("Command handler stopped");
    }

    async fn handle_command(&self, command: Command) -> Result<()> {
        let reply = execute_command(&self.coordinator, &command).await;
        self.send_reply(reply).await
    }

    async fn send_reply(&self, reply: CommandReply) -> Result<()> {
        let json = serde_json::to_string(&reply)?;
        let key = reply.correlation_id.to_string();
        let record = FutureRecord::to(&self.reply_topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send reply: {}", e))?;

        Ok(())
    }
}

/// Runs one command against the coordinator and builds the reply. Business
/// rejections (insufficient stock, unknown reservation) become `Failed`
/// replies; so do malformed payloads and internal errors.
pub async fn execute_command(coordinator: &ReservationCoordinator, command: &Command) -> CommandReply {
    let outcome = match command.command_type {
        CommandType::ReserveProducts => reserve_products(coordinator, command).await,
        CommandType::ReleaseReservation => release_reservation(coordinator, command).await,
    };

    match outcome {
        Ok(reply) => reply,
        Err(e) => {
            if e.grpc_code() == tonic::Code::Internal {
                error!(command_id = %command.id, error = %e, "Command failed unexpectedly");
            } else {
                warn!(command_id = %command.id, error = %e, "Command rejected");
            }
            CommandReply::failed(command.id, command.correlation_id, e.public_message())
        }
    }
}

async fn reserve_products(
    coordinator: &ReservationCoordinator,
    command: &Command,
) -> Result<CommandReply, ReservationError> {
    let data: ReserveProductsData = serde_json::from_value(command.payload.clone())
        .map_err(|e| ReservationError::validation(format!("Malformed ReserveProducts payload: {}", e)))?;

    let outcome = coordinator
        .reserve(ReserveRequest {
            reservation_id: data.reservation_id,
            items: data
                .items
                .into_iter()
                .map(|i| ReserveItem {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect(),
            reserved_by: data.reserved_by,
            reason: data.reason,
            reference_id: data.reference_id,
        })
        .await?;

    let result = serde_json::to_value(&outcome)
        .map_err(|e| ReservationError::Store(e.into()))?;

    if outcome.all_reserved {
        Ok(CommandReply::success(command.id, command.correlation_id, Some(result)))
    } else {
        let mut reply = CommandReply::failed(
            command.id,
            command.correlation_id,
            "Products could not be reserved".to_string(),
        );
        reply.result = Some(result);
        Ok(reply)
    }
}

async fn release_reservation(
    coordinator: &ReservationCoordinator,
    command: &Command,
) -> Result<CommandReply, ReservationError> {
    let data: ReleaseReservationData = serde_json::from_value(command.payload.clone())
        .map_err(|e| ReservationError::validation(format!("Malformed ReleaseReservation payload: {}", e)))?;

    let outcome = coordinator.release(&data.reservation_id).await?;

    if outcome.success {
        Ok(CommandReply::success(
            command.id,
            command.correlation_id,
            Some(serde_json::json!({ "released": true, "reservation_id": data.reservation_id })),
        ))
    } else {
        Ok(CommandReply::failed(command.id, command.correlation_id, outcome.message))
    }
}
