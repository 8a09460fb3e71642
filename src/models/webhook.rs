//! Provider webhook payloads

use serde::{Deserialize, Deserializer};

/// Top-level webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A party on a call or message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneParty {
    pub phone_number: Option<String>,
}

/// `payload.object` for ringing/ended/missed/rejected events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallObject {
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    pub caller: Option<PhoneParty>,
    pub callee: Option<PhoneParty>,
    pub ringing_start_time: Option<String>,
    pub answer_start_time: Option<String>,
    pub call_end_time: Option<String>,
}

/// One recording in a `phone.recording_completed` delivery.
///
/// Fields are read leniently: a value of the wrong type drops that field
/// instead of the whole delivery, so the call can still be finalized.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub download_url: Option<String>,
    /// Recording length in whole seconds.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingObject {
    #[serde(default, deserialize_with = "lenient_list")]
    pub recordings: Vec<RecordingItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsAttachment {
    pub download_url: Option<String>,
    pub name: Option<String>,
}

/// `payload.object` for sms_sent/sms_received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsObject {
    pub message_id: Option<String>,
    pub sender: Option<PhoneParty>,
    #[serde(default)]
    pub to_members: Vec<PhoneParty>,
    pub message: Option<String>,
    pub date_time: Option<String>,
    #[serde(default)]
    pub attachments: Vec<SmsAttachment>,
}

/// `payload` for `endpoint.url_validation`.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlValidationPayload {
    #[serde(rename = "plainToken")]
    pub plain_token: Option<String>,
}

/// Strings pass through, numbers are rendered, anything else is dropped.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Seconds as an integer, float or numeric string, rounded. Negative or
/// non-numeric values are dropped.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let secs = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(secs
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round() as u64))
}

/// Array entries that are not objects are skipped; a non-array is empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
