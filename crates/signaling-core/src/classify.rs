use serde_json::Value;
use tracing::debug;

use crate::{
    error::{SignalingError, create_server_error},
    types::{
        DisconnectCause, ERROR_HEADER, InboundEnvelope, InboundKind, InboundMessage,
        MessageOrigin, ParsedMessage,
    },
};

/// Error carried out-of-band as `X-Twilio-Error: <code> <message...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderError {
    pub code: u32,
    pub message: String,
}

impl HeaderError {
    /// Parse a raw header value. A non-numeric code is reported as `0`.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.trim().split(' ');
        let code = parts
            .next()
            .and_then(|code| code.parse::<u32>().ok())
            .unwrap_or(0);
        let message = parts.collect::<Vec<_>>().join(" ");
        Self { code, message }
    }

    pub fn into_error(self) -> SignalingError {
        create_server_error(self.code, &self.message)
    }
}

/// Everything the classifier may look at, detached from any session object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationInput {
    pub header_error: Option<HeaderError>,
    pub body: Option<ParsedMessage>,
    pub cause: Option<DisconnectCause>,
}

impl ClassificationInput {
    pub fn from_cause(cause: Option<DisconnectCause>) -> Self {
        Self {
            cause,
            ..Self::default()
        }
    }

    /// Build input from an optional session request/response.
    ///
    /// Self-originated messages contribute nothing, and a malformed body is
    /// treated as no body at all.
    pub fn from_inbound(message: Option<&InboundMessage>, cause: Option<DisconnectCause>) -> Self {
        let Some(message) = message.filter(|m| m.origin == MessageOrigin::Remote) else {
            return Self::from_cause(cause);
        };

        let body = match parse_body(message) {
            Ok(body) => body,
            Err(err) => {
                debug!(code = err.code, "ignoring malformed body while classifying failure");
                None
            }
        };

        Self {
            header_error: header_error(message),
            body,
            cause,
        }
    }
}

/// Read the error header of a message, if present.
pub fn header_error(message: &InboundMessage) -> Option<HeaderError> {
    message.header(ERROR_HEADER).map(HeaderError::parse)
}

/// Parse the JSON body of a message. `Ok(None)` when there is no body.
pub fn parse_body(message: &InboundMessage) -> Result<Option<ParsedMessage>, SignalingError> {
    match message.body.as_deref() {
        Some(body) if !body.is_empty() => parse_payload(body).map(Some),
        _ => Ok(None),
    }
}

/// Parse one RSP body.
pub fn parse_payload(body: &str) -> Result<ParsedMessage, SignalingError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|_| SignalingError::incoming_message_invalid())?;
    let envelope = InboundEnvelope::from_payload(&payload);
    Ok(ParsedMessage { envelope, payload })
}

/// Error described by an RSP body: an explicit `error`, or a normal room completion.
pub fn body_error(body: &ParsedMessage) -> Option<SignalingError> {
    match body.kind() {
        InboundKind::Error => {
            let code = body
                .envelope
                .code
                .as_ref()
                .and_then(Value::as_u64)
                .and_then(|code| u32::try_from(code).ok())
                .unwrap_or(0);
            let message = body.envelope.message.as_deref().unwrap_or_default();
            Some(create_server_error(code, message))
        }
        InboundKind::Disconnected if body.is_room_completed() => {
            Some(SignalingError::room_completed())
        }
        _ => None,
    }
}

/// Error carried by the message itself: the header wins over the body.
pub fn error_from_message(input: &ClassificationInput) -> Option<SignalingError> {
    input
        .header_error
        .clone()
        .map(HeaderError::into_error)
        .or_else(|| input.body.as_ref().and_then(body_error))
}

/// Map a low-level cause to the connection error taxonomy.
pub fn error_from_cause(cause: Option<&DisconnectCause>) -> SignalingError {
    match cause {
        Some(DisconnectCause::RequestTimeout) => SignalingError::connection_timeout(),
        Some(DisconnectCause::ConnectionError) => SignalingError::connection(),
        Some(DisconnectCause::Other(_)) | None => SignalingError::connection_disconnected(),
    }
}

/// Classify a session failure into exactly one signaling error.
pub fn classify(input: &ClassificationInput) -> SignalingError {
    error_from_message(input).unwrap_or_else(|| error_from_cause(input.cause.as_ref()))
}
