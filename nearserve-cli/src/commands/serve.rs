//! The `serve` command: a newline-delimited-JSON TCP gateway to the engine.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nearserve::config::EngineConfig;
use nearserve::engine::{DispatchEngine, SubmitRequest};
use nearserve::events::OutboundEvent;
use nearserve::persistence::{NoOpNotifier, NoOpRepository};
use nearserve::provider::{MemoryProfileStore, ProviderSnapshot};
use nearserve::session::IdentityKind;

use crate::protocol::Command;

/// Arguments for `nearserve serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:5050")]
    pub bind: String,

    /// JSON file of provider records to seed the in-memory profile store.
    #[arg(long)]
    pub providers: Option<PathBuf>,
}

/// Gateway-local reply to the `health` command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    event: &'static str,
    connected_users: usize,
    connected_providers: usize,
    active_requests: usize,
    live_searches: usize,
    version: &'static str,
}

/// Runs the gateway until Ctrl+C.
pub async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryProfileStore::new());
    if let Some(path) = &args.providers {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<ProviderSnapshot> = serde_json::from_str(&raw)?;
        let count = records.len();
        for record in records {
            store.insert_provider(record);
        }
        info!(count, path = %path.display(), "seeded provider records");
    }

    let engine = Arc::new(DispatchEngine::new(
        EngineConfig::default(),
        store,
        Arc::new(NoOpRepository),
        Arc::new(NoOpNotifier),
    ));

    let listener = TcpListener::bind(&args.bind).await?;
    info!(bind = %args.bind, version = nearserve::VERSION, "gateway listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "connection accepted");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(engine, stream).await {
                        debug!(%peer, %error, "connection closed with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                engine.shutdown();
                break;
            }
        }
    }
    Ok(())
}

/// Pumps one connection: inbound command lines in, outbound events out.
async fn handle_connection(
    engine: Arc<DispatchEngine>,
    stream: TcpStream,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Raw outbound lines; the writer task owns the socket's write half.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(mut line) = line_rx.recv().await {
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // Engine events are serialized onto the same line stream.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<OutboundEvent>();
    let event_lines = line_tx.clone();
    let pump = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if event_lines.send(line).is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "failed to serialize outbound event"),
            }
        }
    });

    // Identity bound by the register command, cleaned up on disconnect.
    let mut identity: Option<(IdentityKind, String)> = None;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match serde_json::from_str::<Command>(&line) {
            Ok(command) => command,
            Err(error) => {
                let _ = event_tx.send(OutboundEvent::ErrorAck {
                    message: format!("malformed command: {error}"),
                });
                continue;
            }
        };

        if let Err(error) = dispatch(&engine, command, &event_tx, &line_tx, &mut identity).await {
            let _ = event_tx.send(OutboundEvent::ErrorAck {
                message: error.to_string(),
            });
        }
    }

    if let Some((kind, id)) = identity {
        engine.disconnect(kind, &id);
        debug!(%kind, id = %id, "session deregistered on disconnect");
    }
    drop(event_tx);
    let _ = pump.await;
    drop(line_tx);
    let _ = writer.await;
    Ok(())
}

/// Maps one command onto the engine.
async fn dispatch(
    engine: &Arc<DispatchEngine>,
    command: Command,
    event_tx: &mpsc::UnboundedSender<OutboundEvent>,
    line_tx: &mpsc::UnboundedSender<String>,
    identity: &mut Option<(IdentityKind, String)>,
) -> Result<(), nearserve::error::DispatchError> {
    match command {
        Command::Register {
            identity_id,
            identity_kind,
        } => {
            engine.register(identity_kind, &identity_id, event_tx.clone())?;
            *identity = Some((identity_kind, identity_id));
            Ok(())
        }

        Command::ServiceRequest {
            request_id,
            user_id,
            category,
            description,
            urgency,
            latitude,
            longitude,
        } => {
            engine
                .submit_request(SubmitRequest {
                    request_id,
                    user_id,
                    category,
                    description,
                    urgency,
                    latitude,
                    longitude,
                })
                .await?;
            Ok(())
        }

        Command::CancelServiceRequest {
            request_id,
            user_id,
        } => engine.cancel_request(&request_id, &user_id),

        Command::ProviderResponse {
            request_id,
            provider_id,
            response,
            eta,
        } => {
            engine
                .provider_responds(&request_id, &provider_id, response.into(), eta)
                .await?;
            Ok(())
        }

        Command::ProviderLocationUpdate {
            provider_id,
            latitude,
            longitude,
            accuracy_m,
        } => {
            engine
                .update_provider_location(&provider_id, latitude, longitude, accuracy_m)
                .await
        }

        Command::ProviderStatusUpdate {
            provider_id,
            is_online,
        } => {
            engine
                .update_provider_online_status(&provider_id, is_online)
                .await
        }

        Command::ServiceComplete {
            request_id,
            provider_id,
        } => engine.complete_service(&request_id, &provider_id),

        Command::Health => {
            let health = engine.health_snapshot();
            let report = HealthReport {
                event: "healthReport",
                connected_users: health.connected_users,
                connected_providers: health.connected_providers,
                active_requests: health.active_requests,
                live_searches: health.live_searches,
                version: nearserve::VERSION,
            };
            if let Ok(line) = serde_json::to_string(&report) {
                let _ = line_tx.send(line);
            }
            Ok(())
        }
    }
}
