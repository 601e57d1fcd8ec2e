use crate::game::GameInit;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Sent by the authority once per successful connect.
pub const EVENT_GAME_INIT: &str = "game:init";
/// Settlement of a previously submitted request.
pub const EVENT_RESULT: &str = "result";
/// Acknowledgement of a liveness ping.
pub const EVENT_PONG: &str = "pong";
/// Transient server-side failure.
pub const EVENT_INTERNAL_ERROR: &str = "internalError";
/// Free-form notice for the player.
pub const EVENT_ALERT: &str = "alert";
/// The same account opened a session somewhere else.
pub const EVENT_ANOTHER_DEVICE: &str = "AnotherDevice";

/// Liveness ping (no payload).
pub const EVENT_PING: &str = "ping";
/// Wager submission.
pub const EVENT_REQUEST: &str = "request";

/// Named-event envelope carried in every text message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// A frame with no payload.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {event} payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
}

/// Wager submission: indices into the current [crate::GameConfiguration].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub bet_index: usize,
    pub risk_index: usize,
    pub row_index: usize,
}

/// Authoritative outcome of one wager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub win_amount: f64,
    pub multiplier: f64,
    /// Distance from the board center (0 is the center slot or center pair).
    pub index: usize,
    pub risk_index: usize,
    pub row_index: usize,
    /// Player balance after this result is applied.
    pub balance: f64,
}

/// Events sent by the authority.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    GameInit(GameInit),
    Result(RoundResult),
    Pong,
    InternalError(String),
    Alert(String),
    AnotherDevice,
}

impl ServerEvent {
    /// Decode a frame, returning `Ok(None)` for events this client does not consume.
    pub fn decode(frame: Frame) -> Result<Option<Self>, DecodeError> {
        let Frame { event, data } = frame;
        let decoded = match event.as_str() {
            EVENT_GAME_INIT => Self::GameInit(payload(&event, data)?),
            EVENT_RESULT => Self::Result(payload(&event, data)?),
            EVENT_PONG => Self::Pong,
            EVENT_INTERNAL_ERROR => Self::InternalError(message_of(&data)),
            EVENT_ALERT => Self::Alert(message_of(&data)),
            EVENT_ANOTHER_DEVICE => Self::AnotherDevice,
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn into_frame(self) -> Frame {
        match self {
            Self::GameInit(init) => Frame::new(EVENT_GAME_INIT, to_value(&init)),
            Self::Result(result) => Frame::new(EVENT_RESULT, to_value(&result)),
            Self::Pong => Frame::bare(EVENT_PONG),
            Self::InternalError(message) => {
                Frame::new(EVENT_INTERNAL_ERROR, Value::String(message))
            }
            Self::Alert(message) => Frame::new(EVENT_ALERT, Value::String(message)),
            Self::AnotherDevice => Frame::bare(EVENT_ANOTHER_DEVICE),
        }
    }
}

/// Events sent by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Ping,
    Request(BetRequest),
}

impl ClientEvent {
    pub fn decode(frame: Frame) -> Result<Option<Self>, DecodeError> {
        let Frame { event, data } = frame;
        match event.as_str() {
            EVENT_PING => Ok(Some(Self::Ping)),
            EVENT_REQUEST => Ok(Some(Self::Request(payload(&event, data)?))),
            _ => Ok(None),
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            Self::Ping => Frame::bare(EVENT_PING),
            Self::Request(request) => Frame::new(EVENT_REQUEST, to_value(&request)),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload {
        event: event.to_string(),
        source,
    })
}

// Plain structs with string keys always serialize.
fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Notices arrive either as a bare string or as `{ "message": ... }`.
fn message_of(data: &Value) -> String {
    match data {
        Value::String(message) => message.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => data.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
