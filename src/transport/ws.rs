//! WebSocket client bridge.
//!
//! Each socket is registered with the [`RoomHub`] for outbound events and
//! its inbound `{event, data}` frames are translated into batch lifecycle
//! verbs. Every verb runs in its own task so a slow worker reply never
//! stalls the socket's read loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::batch::events::{error_payload, BatchEvent};
use crate::batch::lifecycle::ControlVerb;
use crate::service::WorkerService;
use crate::transport::rooms::RoomHub;
use crate::transport::{ClientId, RoomTransport};

/// One inbound frame.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    #[serde(default, deserialize_with = "id_string")]
    batch_id: String,
    #[serde(default, deserialize_with = "id_strings")]
    report_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlRequest {
    #[serde(default, deserialize_with = "id_string")]
    batch_id: String,
}

/// Ids arrive as strings or numbers; numbers are normalized to strings.
fn id_from_value<E: serde::de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(E::custom(format!("expected a string or numeric id, got {other}"))),
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    id_from_value(Value::deserialize(deserializer)?)
}

fn id_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(id_from_value).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(<D::Error as serde::de::Error>::custom(format!(
            "expected a list of ids, got {other}"
        ))),
    }
}

/// Client intent decoded from a frame.
#[derive(Debug, PartialEq, Eq)]
enum ClientIntent {
    Start {
        batch_id: String,
        report_ids: Vec<String>,
    },
    Control {
        batch_id: String,
        verb: ControlVerb,
    },
}

fn decode_frame(text: &str) -> Result<ClientIntent, String> {
    let frame: ClientFrame =
        serde_json::from_str(text).map_err(|e| format!("malformed frame: {e}"))?;
    let data = if frame.data.is_null() {
        Value::Object(Map::new())
    } else {
        frame.data
    };

    let verb = match frame.event.as_str() {
        "start_taqeem_processing" => {
            let req: StartRequest = serde_json::from_value(data)
                .map_err(|e| format!("invalid start_taqeem_processing payload: {e}"))?;
            return Ok(ClientIntent::Start {
                batch_id: req.batch_id,
                report_ids: req.report_ids,
            });
        }
        "pause_processing" => ControlVerb::Pause,
        "resume_processing" => ControlVerb::Resume,
        "stop_processing" => ControlVerb::Stop,
        other => return Err(format!("unknown event: {other}")),
    };

    let req: ControlRequest = serde_json::from_value(data)
        .map_err(|e| format!("invalid {} payload: {e}", frame.event))?;
    Ok(ClientIntent::Control {
        batch_id: req.batch_id,
        verb,
    })
}

/// Serve one connected socket until it closes.
///
/// `owner` is the user identity supplied at connect time, recorded on any
/// batch this client starts.
pub async fn run_client_socket(
    socket: WebSocket,
    hub: Arc<RoomHub>,
    service: Arc<WorkerService>,
    owner: Option<String>,
) {
    let (client, mut outbound) = hub.connect();
    info!(client = %client, owner = ?owner, "websocket client connected");

    let (mut sink, mut stream) = socket.split();

    let writer_client = client.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(client = %writer_client, %err, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!(client = %writer_client, "socket closed while sending");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch(&client, owner.as_deref(), text.as_str(), &hub, &service);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(client = %client, %err, "websocket read error");
                break;
            }
        }
    }

    hub.disconnect(&client);
    writer.abort();
    info!(client = %client, "websocket client disconnected");
}

fn dispatch(
    client: &ClientId,
    owner: Option<&str>,
    text: &str,
    hub: &Arc<RoomHub>,
    service: &Arc<WorkerService>,
) {
    let intent = match decode_frame(text) {
        Ok(intent) => intent,
        Err(reason) => {
            warn!(client = %client, %reason, "rejected client frame");
            hub.emit(
                client,
                BatchEvent::ProcessingError.name(),
                error_payload("", &reason),
            );
            return;
        }
    };

    let client = client.clone();
    let owner = owner.map(str::to_owned);
    let service = Arc::clone(service);
    tokio::spawn(async move {
        let lifecycle = service.lifecycle();
        let outcome = match intent {
            ClientIntent::Start {
                batch_id,
                report_ids,
            } => lifecycle.start(&client, owner, &batch_id, report_ids).await,
            ClientIntent::Control { batch_id, verb } => {
                lifecycle.control(&client, &batch_id, verb).await
            }
        };
        if let Err(err) = outcome {
            debug!(client = %client, %err, "client verb finished with error");
        }
    });
}
