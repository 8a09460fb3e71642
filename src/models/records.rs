//! Case-management record fields sent downstream

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a downstream entity (record, case, claimant, staff member).
///
/// The API returns numeric ids; they are kept as strings and written back as
/// numbers when they look like one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Read an id from a JSON value (number or non-empty string).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => Some(Self::new(n.to_string())),
            serde_json::Value::String(s) if !s.is_empty() => Some(Self::new(s.as_str())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<u64>() {
            Ok(n) => serializer.serialize_u64(n),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid record id: {}", value)))
    }
}

/// Status values of a telephony event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallStatus {
    VendorStart,
    VendorFinish,
}

/// `type` discriminator of a phone log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogType {
    Call,
    #[serde(rename = "SMS")]
    Sms,
}

/// Ongoing-call record created when the phone starts ringing.
#[derive(Debug, Clone, Serialize)]
pub struct OngoingCall {
    pub from_number: String,
    pub to_number: String,
    pub start_time: String,
    pub ongoing: bool,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub involvee_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<RecordId>,
    pub matter_type: String,
}

/// Closes an ongoing-call record once the call is over.
#[derive(Debug, Clone, Serialize)]
pub struct OngoingCallFinish {
    pub end_time: String,
    pub ongoing: bool,
    pub status: CallStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct OngoingCallRecording {
    pub recording_url: String,
}

/// Completed-call record created for every terminal call event.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedCall {
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub raw_from_number: String,
    pub raw_to_number: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub involvee_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matter_id: Option<RecordId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedCallRecording {
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub recording_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Message record created for each SMS.
#[derive(Debug, Clone, Serialize)]
pub struct SmsRecord {
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub raw_from_number: String,
    pub raw_to_number: String,
    pub text_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub involvee_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matter_id: Option<RecordId>,
    pub created_at: String,
    /// Attachment download URL to file name.
    pub media_params: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_from_json() {
        assert_eq!(RecordId::from_json(&json!(42)), Some(RecordId::new("42")));
        assert_eq!(RecordId::from_json(&json!("abc")), Some(RecordId::new("abc")));
        assert_eq!(RecordId::from_json(&json!("")), None);
        assert_eq!(RecordId::from_json(&json!(null)), None);
    }

    #[test]
    fn test_record_id_serializes_numeric_as_number() {
        assert_eq!(serde_json::to_value(RecordId::new("42")).unwrap(), json!(42));
        assert_eq!(serde_json::to_value(RecordId::new("x-1")).unwrap(), json!("x-1"));
    }

    #[test]
    fn test_completed_call_shape() {
        let record = CompletedCall {
            log_type: LogType::Call,
            raw_from_number: "4155550100".into(),
            raw_to_number: "4155550199".into(),
            start_time: "2024-03-01 09:15:00 AM".into(),
            end_time: "2024-03-01 09:15:37 AM".into(),
            duration: 37,
            involvee_id: Some(RecordId::new("7")),
            staff_id: None,
            matter_id: Some(RecordId::new("12")),
        };

        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["type"], "Call");
        assert_eq!(v["duration"], 37);
        assert_eq!(v["matter_id"], 12);
        assert!(v.get("staff_id").is_none());
    }

    #[test]
    fn test_sms_type_and_status_names() {
        assert_eq!(serde_json::to_value(LogType::Sms).unwrap(), json!("SMS"));
        assert_eq!(
            serde_json::to_value(CallStatus::VendorFinish).unwrap(),
            json!("VendorFinish")
        );
    }
}
