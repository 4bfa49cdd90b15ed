//! Outbound command serialization.
//!
//! Every command is written as one compact JSON object followed by a `\n`
//! byte, with the correlation id injected as `commandId`.

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::worker::protocol::WorkerCommand;
use crate::{AppError, Result};

/// Serialize `command` into its wire object with `commandId` injected.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails or does not yield
/// a JSON object (neither happens for [`WorkerCommand`]).
pub fn encode_command(command_id: u64, command: &WorkerCommand) -> Result<Value> {
    let mut value = serde_json::to_value(command)
        .map_err(|e| AppError::Protocol(format!("failed to serialise command: {e}")))?;

    let Value::Object(map) = &mut value else {
        return Err(AppError::Protocol(format!(
            "command `{}` did not serialise to an object",
            command.action()
        )));
    };
    map.insert("commandId".to_owned(), Value::from(command_id));

    Ok(value)
}

/// Write `value` to `stdin` as a single NDJSON line and flush it.
///
/// # Errors
///
/// - [`AppError::Protocol`] if serialization fails.
/// - [`AppError::Write`]`("write failed: …")` if the stream is closed
///   (e.g. the worker has exited).
pub async fn write_json_line<W>(stdin: &mut W, value: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut bytes = serde_json::to_vec(value)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;

    bytes.push(b'\n');

    stdin
        .write_all(&bytes)
        .await
        .map_err(|e| AppError::Write(format!("write failed: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| AppError::Write(format!("flush failed: {e}")))
}
