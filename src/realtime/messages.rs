//! WebSocket Message Types
//!
//! Frame codec for the real-time channel. Inbound frames are JSON objects
//! tagged by a `type` field; they are decoded into [`InboundEvent`]. Outbound
//! control frames are [`OutboundFrame`] values encoded the same way.
//!
//! Decoding never fails the receive loop: frames that are not JSON objects or
//! lack a `type` are dropped, and frames with an unknown or malformed shape
//! become [`InboundEvent::ProtocolError`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RealtimeResult;

/// Events received from the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Live status of one printer
    PrinterStatus {
        printer_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        /// Print progress, clamped to 0-100
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_job_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bed_temp: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        nozzle_temp: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_minutes: Option<i64>,
    },
    /// Progress or state change of a print job
    JobUpdate {
        job_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    /// Fleet-wide or printer-scoped notification
    SystemEvent {
        event_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        printer_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Subscription confirmed
    Subscribed { printer_id: String },
    /// Unsubscription confirmed
    Unsubscribed { printer_id: String },
    /// Pong response to ping
    Pong,
    /// Backend error, or a frame this client could not make sense of
    ProtocolError { message: String },
}

impl InboundEvent {
    /// Wire name of this event's `type`
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::PrinterStatus { .. } => "printer_status",
            InboundEvent::JobUpdate { .. } => "job_update",
            InboundEvent::SystemEvent { .. } => "system_event",
            InboundEvent::Subscribed { .. } => "subscribed",
            InboundEvent::Unsubscribed { .. } => "unsubscribed",
            InboundEvent::Pong => "pong",
            InboundEvent::ProtocolError { .. } => "error",
        }
    }

    /// Printer this event concerns, if any
    pub fn printer_id(&self) -> Option<&str> {
        match self {
            InboundEvent::PrinterStatus { printer_id, .. }
            | InboundEvent::Subscribed { printer_id }
            | InboundEvent::Unsubscribed { printer_id } => Some(printer_id),
            InboundEvent::SystemEvent { printer_id, .. } => printer_id.as_deref(),
            _ => None,
        }
    }

    fn protocol_error(message: impl Into<String>) -> Self {
        InboundEvent::ProtocolError {
            message: message.into(),
        }
    }
}

/// Control frames sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Start receiving `printer_status` events for a printer
    SubscribePrinter { printer_id: String },
    /// Stop receiving `printer_status` events for a printer
    UnsubscribePrinter { printer_id: String },
    /// Ping for keepalive
    Ping,
}

impl OutboundFrame {
    pub fn subscribe(printer_id: impl Into<String>) -> Self {
        OutboundFrame::SubscribePrinter {
            printer_id: printer_id.into(),
        }
    }

    pub fn unsubscribe(printer_id: impl Into<String>) -> Self {
        OutboundFrame::UnsubscribePrinter {
            printer_id: printer_id.into(),
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> RealtimeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PrinterStatusData {
    status: Option<String>,
    progress: Option<f64>,
    current_job: Option<String>,
    temperature_bed: Option<f64>,
    temperature_nozzle: Option<f64>,
    remaining_time_minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct JobUpdateData {
    status: Option<String>,
    progress: Option<f64>,
    file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemEventData {
    printer_id: Option<String>,
    message: Option<String>,
}

/// Decode one inbound text frame
///
/// Returns `None` for input that is not a JSON object with a string `type`.
/// Each type reads only its own fields; anything else on the frame is ignored.
pub fn decode(text: &str) -> Option<InboundEvent> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, text = %text, "Dropping frame that is not valid JSON");
            return None;
        }
    };

    let Some(kind) = frame.get("type").and_then(Value::as_str) else {
        tracing::debug!(text = %text, "Dropping frame without a type");
        return None;
    };

    let event = match kind {
        "printer_status" => decode_printer_status(&frame),
        "job_update" => decode_job_update(&frame),
        "system_event" => decode_system_event(&frame),
        "subscribed" => required_str(&frame, kind, "printer_id")
            .map(|printer_id| InboundEvent::Subscribed { printer_id }),
        "unsubscribed" => required_str(&frame, kind, "printer_id")
            .map(|printer_id| InboundEvent::Unsubscribed { printer_id }),
        "pong" => Ok(InboundEvent::Pong),
        "error" => Ok(decode_error(&frame)),
        other => Err(InboundEvent::protocol_error(format!(
            "Unknown message type: {}",
            other
        ))),
    };
    Some(event.unwrap_or_else(|error| error))
}

fn decode_printer_status(frame: &Value) -> Result<InboundEvent, InboundEvent> {
    let printer_id = required_str(frame, "printer_status", "printer_id")?;
    let data: PrinterStatusData = payload("printer_status", frame.get("data"))?;
    Ok(InboundEvent::PrinterStatus {
        printer_id,
        status: data.status,
        progress: data.progress.map(clamp_progress),
        current_job_name: data.current_job,
        bed_temp: data.temperature_bed,
        nozzle_temp: data.temperature_nozzle,
        remaining_minutes: data.remaining_time_minutes,
    })
}

fn decode_job_update(frame: &Value) -> Result<InboundEvent, InboundEvent> {
    let job_id = required_str(frame, "job_update", "job_id")?;
    let data: JobUpdateData = payload("job_update", frame.get("data"))?;
    Ok(InboundEvent::JobUpdate {
        job_id,
        status: data.status,
        progress: data.progress.map(clamp_progress),
        file_name: data.file_name,
    })
}

fn decode_system_event(frame: &Value) -> Result<InboundEvent, InboundEvent> {
    let event_type = required_str(frame, "system_event", "event_type")?;
    let data: SystemEventData = payload("system_event", frame.get("data"))?;
    Ok(InboundEvent::SystemEvent {
        event_type,
        printer_id: data.printer_id.or_else(|| loose_str(frame, "printer_id")),
        message: data.message.or_else(|| loose_str(frame, "message")),
    })
}

fn decode_error(frame: &Value) -> InboundEvent {
    let message = loose_str(frame, "message")
        .or_else(|| {
            frame
                .get("data")
                .and_then(|data| data.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unspecified server error".to_string());
    InboundEvent::ProtocolError { message }
}

/// Top-level string field the frame type cannot do without
fn required_str(frame: &Value, kind: &str, field: &str) -> Result<String, InboundEvent> {
    match frame.get(field) {
        None | Some(Value::Null) => Err(InboundEvent::protocol_error(format!(
            "{} frame missing {}",
            kind, field
        ))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(InboundEvent::protocol_error(format!(
            "Malformed {} frame: {} must be a string, got {}",
            kind, field, other
        ))),
    }
}

/// Optional top-level string; other JSON types count as absent
fn loose_str(frame: &Value, field: &str) -> Option<String> {
    frame.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Deserialize the optional `data` object of a frame; absent or null data
/// yields the all-empty payload
fn payload<T: DeserializeOwned + Default>(
    kind: &str,
    data: Option<&Value>,
) -> Result<T, InboundEvent> {
    match data {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            InboundEvent::protocol_error(format!("Malformed {} data: {}", kind, e))
        }),
    }
}

fn clamp_progress(progress: f64) -> u8 {
    if progress.is_nan() {
        return 0;
    }
    progress.round().clamp(0.0, 100.0) as u8
}
