//! Webhook event classification and field extraction.
//!
//! Turns a raw provider delivery into a [`NormalizedEvent`]: one of a fixed
//! set of call/SMS lifecycle stages with the fields that stage needs. Phone
//! numbers come out in 10-digit local form; timestamps are left untouched.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::models::{
    CallObject, PhoneParty, RecordingObject, SmsObject, UrlValidationPayload, WebhookEnvelope,
};

/// Why a call ended. Informational only: all three are handled the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Hangup,
    Missed,
    Rejected,
}

/// Lifecycle stage of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    UrlValidation,
    CallRinging,
    CallEnded(EndReason),
    RecordingReady,
    SmsMessage,
}

impl EventKind {
    /// Map a provider event name to its stage.
    pub fn classify(event: &str) -> Option<Self> {
        let kind = match event {
            "endpoint.url_validation" => Self::UrlValidation,
            "phone.caller_ringing" => Self::CallRinging,
            "phone.caller_ended" | "phone.callee_ended" => Self::CallEnded(EndReason::Hangup),
            "phone.callee_missed" => Self::CallEnded(EndReason::Missed),
            "phone.callee_rejected" => Self::CallEnded(EndReason::Rejected),
            "phone.recording_completed" => Self::RecordingReady,
            "phone.sms_sent" | "phone.sms_received" => Self::SmsMessage,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrlValidation => write!(f, "url_validation"),
            Self::CallRinging => write!(f, "call_ringing"),
            Self::CallEnded(EndReason::Hangup) => write!(f, "call_ended"),
            Self::CallEnded(EndReason::Missed) => write!(f, "call_missed"),
            Self::CallEnded(EndReason::Rejected) => write!(f, "call_rejected"),
            Self::RecordingReady => write!(f, "recording_ready"),
            Self::SmsMessage => write!(f, "sms_message"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unrecognized event: {0}")]
    Unrecognized(String),

    #[error("Malformed webhook body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0} event without a call_id")]
    MissingCallId(EventKind),
}

/// Fields shared by ringing and terminal call events.
#[derive(Debug, Clone, PartialEq)]
pub struct CallInfo {
    /// Absent ids still produce records; they just cannot be correlated.
    pub call_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub ringing_start_time: Option<String>,
    pub answer_start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub call_id: String,
    pub download_url: Option<String>,
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmsInfo {
    pub message_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub sent_at: Option<String>,
    /// Download URL to file name.
    pub attachments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    UrlValidation { plain_token: String },
    CallRinging(CallInfo),
    CallEnded { call: CallInfo, reason: EndReason },
    RecordingReady(RecordingInfo),
    SmsMessage(SmsInfo),
}

impl NormalizedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UrlValidation { .. } => EventKind::UrlValidation,
            Self::CallRinging(_) => EventKind::CallRinging,
            Self::CallEnded { reason, .. } => EventKind::CallEnded(*reason),
            Self::RecordingReady(_) => EventKind::RecordingReady,
            Self::SmsMessage(_) => EventKind::SmsMessage,
        }
    }

    /// Correlation key: call id for call events, message id for SMS.
    pub fn correlation_key(&self) -> Option<&str> {
        match self {
            Self::UrlValidation { .. } => None,
            Self::CallRinging(call) | Self::CallEnded { call, .. } => call.call_id.as_deref(),
            Self::RecordingReady(rec) => Some(&rec.call_id),
            Self::SmsMessage(sms) => sms.message_id.as_deref(),
        }
    }
}

/// Normalize a raw webhook body.
pub fn normalize(body: &[u8]) -> Result<NormalizedEvent, NormalizeError> {
    let envelope: WebhookEnvelope = serde_json::from_slice(body)?;
    normalize_envelope(envelope)
}

/// Normalize an already-parsed delivery.
pub fn normalize_envelope(envelope: WebhookEnvelope) -> Result<NormalizedEvent, NormalizeError> {
    let kind = EventKind::classify(&envelope.event)
        .ok_or_else(|| NormalizeError::Unrecognized(envelope.event.clone()))?;
    let payload = envelope.payload;

    match kind {
        EventKind::UrlValidation => {
            let p: UrlValidationPayload = serde_json::from_value(payload)?;
            Ok(NormalizedEvent::UrlValidation {
                plain_token: p.plain_token.unwrap_or_default(),
            })
        }
        EventKind::CallRinging => Ok(NormalizedEvent::CallRinging(call_info(&payload)?)),
        EventKind::CallEnded(reason) => Ok(NormalizedEvent::CallEnded {
            call: call_info(&payload)?,
            reason,
        }),
        EventKind::RecordingReady => {
            let object: RecordingObject = object_of(&payload)?;
            let recording = object.recordings.into_iter().next().unwrap_or_default();
            let call_id = non_empty(recording.call_id).ok_or(NormalizeError::MissingCallId(kind))?;
            Ok(NormalizedEvent::RecordingReady(RecordingInfo {
                call_id,
                download_url: non_empty(recording.download_url),
                duration: recording.duration,
            }))
        }
        EventKind::SmsMessage => {
            let object: SmsObject = object_of(&payload)?;
            let attachments = object
                .attachments
                .into_iter()
                .filter_map(|a| {
                    let url = non_empty(a.download_url)?;
                    Some((url, a.name.unwrap_or_default()))
                })
                .collect();

            Ok(NormalizedEvent::SmsMessage(SmsInfo {
                message_id: non_empty(object.message_id),
                from_number: party_number(object.sender.as_ref()),
                to_number: party_number(object.to_members.first()),
                body: object.message.unwrap_or_default(),
                sent_at: non_empty(object.date_time),
                attachments,
            }))
        }
    }
}

/// Reduce a phone number to its last 10 digits, dropping any country code
/// and formatting.
pub fn normalize_phone(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}

fn call_info(payload: &serde_json::Value) -> Result<CallInfo, NormalizeError> {
    let object: CallObject = object_of(payload)?;

    Ok(CallInfo {
        call_id: non_empty(object.call_id),
        from_number: party_number(object.caller.as_ref()),
        to_number: party_number(object.callee.as_ref()),
        ringing_start_time: non_empty(object.ringing_start_time),
        answer_start_time: non_empty(object.answer_start_time),
        end_time: non_empty(object.call_end_time),
    })
}

/// Deserialize `payload.object`, treating a missing object as empty.
fn object_of<T: DeserializeOwned + Default>(
    payload: &serde_json::Value,
) -> Result<T, NormalizeError> {
    match payload.get("object") {
        Some(obj) if !obj.is_null() => Ok(T::deserialize(obj)?),
        _ => Ok(T::default()),
    }
}

fn party_number(party: Option<&PhoneParty>) -> String {
    party
        .and_then(|p| p.phone_number.as_deref())
        .map(normalize_phone)
        .unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
