//! Call correlation engine.
//!
//! A phone call reaches us as several independent webhook deliveries
//! (ringing, ended, recording ready). The engine relays each one to the
//! case-management API and remembers the ids of the records it created, so
//! later deliveries for the same call can update them:
//!
//! - ringing: create the ongoing-call record, remember its id
//! - ended/missed/rejected: create the completed-call record, remember its
//!   id, close the ongoing-call record if one was created
//! - recording ready: attach the recording to whichever records exist, then
//!   forget the call
//!
//! SMS messages are relayed without correlation. Downstream failures are
//! logged and never retried; nothing propagates past one delivery.

pub mod store;


use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::api::timestamp::parse_timestamp;
use crate::api::{CaseApi, DownstreamError, EntityResolver, Resolution, Resource, TimestampZone};
use crate::events::{CallInfo, EndReason, NormalizedEvent, RecordingInfo, SmsInfo};
use crate::models::{
    CallStatus, CompletedCall, CompletedCallRecording, LogType, OngoingCall, OngoingCallFinish,
    OngoingCallRecording, RecordId, SmsRecord,
};

pub use store::{CallRecord, CallRecordPatch, CorrelationStore, MemoryStore};

/// Which party's number identifies the case a call or message belongs to.
/// Staff are looked up from the other party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseParty {
    /// The dialed party (first recipient for SMS).
    #[default]
    Callee,
    /// The dialing party (sender for SMS).
    Caller,
}

impl CaseParty {
    /// Split `(from, to)` into `(case number, staff number)`.
    pub fn split<'a>(&self, from: &'a str, to: &'a str) -> (&'a str, &'a str) {
        match self {
            Self::Callee => (to, from),
            Self::Caller => (from, to),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown case party '{0}'. Use 'caller' or 'callee'")]
pub struct UnknownCaseParty(String);

impl FromStr for CaseParty {
    type Err = UnknownCaseParty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "callee" => Ok(Self::Callee),
            "caller" => Ok(Self::Caller),
            other => Err(UnknownCaseParty(other.to_string())),
        }
    }
}

impl fmt::Display for CaseParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callee => write!(f, "callee"),
            Self::Caller => write!(f, "caller"),
        }
    }
}

/// Engine settings derived from configuration.
#[derive(Debug, Clone, Default)]
pub struct CorrelatorSettings {
    pub case_party: CaseParty,
    /// Base URL recording links are built on.
    pub public_base_url: String,
    pub timestamps: TimestampZone,
}

pub struct CallCorrelator {
    api: Arc<dyn CaseApi>,
    resolver: Arc<dyn EntityResolver>,
    store: Arc<dyn CorrelationStore>,
    settings: CorrelatorSettings,
}

impl CallCorrelator {
    pub fn new(
        api: Arc<dyn CaseApi>,
        resolver: Arc<dyn EntityResolver>,
        store: Arc<dyn CorrelationStore>,
        settings: CorrelatorSettings,
    ) -> Self {
        Self {
            api,
            resolver,
            store,
            settings,
        }
    }

    /// Process one normalized delivery end to end.
    pub async fn handle(&self, event: NormalizedEvent) {
        match event {
            NormalizedEvent::UrlValidation { .. } => {
                tracing::debug!("URL validation is answered by the webhook endpoint, ignoring");
            }
            NormalizedEvent::CallRinging(call) => self.on_ringing(&call).await,
            NormalizedEvent::CallEnded { call, reason } => self.on_ended(&call, reason).await,
            NormalizedEvent::RecordingReady(rec) => self.on_recording(&rec).await,
            NormalizedEvent::SmsMessage(sms) => self.on_sms(&sms).await,
        }
    }

    /// Number of calls currently being tracked.
    pub fn tracked_calls(&self) -> usize {
        self.store.len()
    }

    /// Forget calls first seen more than `max_age` ago.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        self.store.sweep(max_age)
    }

    async fn on_ringing(&self, call: &CallInfo) {
        let resolution = self.resolve(&call.from_number, &call.to_number).await;

        let fields = OngoingCall {
            from_number: call.from_number.clone(),
            to_number: call.to_number.clone(),
            start_time: self.timestamp(call.ringing_start_time.as_deref()),
            ongoing: true,
            status: CallStatus::VendorStart,
            involvee_id: resolution.claimant_id,
            staff_id: resolution.staff_id,
            matter_type: resolution.case_type.unwrap_or_default(),
        };

        let label = call_label(call);
        match self.create(Resource::TelephonyEvent, &fields).await {
            Ok(id) => {
                tracing::info!("Call {}: created ongoing-call record {}", label, id);
                if let Some(ref call_id) = call.call_id {
                    self.store
                        .merge(call_id, CallRecordPatch::telephony_event(id));
                }
            }
            Err(e) => {
                tracing::warn!("Call {}: failed to create ongoing-call record: {}", label, e);
            }
        }
    }

    async fn on_ended(&self, call: &CallInfo, reason: EndReason) {
        let duration = call_duration(
            call.answer_start_time.as_deref(),
            call.end_time.as_deref(),
        );
        let end_time = self.timestamp(call.end_time.as_deref());
        let resolution = self.resolve(&call.from_number, &call.to_number).await;

        let fields = CompletedCall {
            log_type: LogType::Call,
            raw_from_number: call.from_number.clone(),
            raw_to_number: call.to_number.clone(),
            start_time: self.timestamp(call.ringing_start_time.as_deref()),
            end_time: end_time.clone(),
            duration,
            involvee_id: resolution.claimant_id,
            staff_id: resolution.staff_id,
            matter_id: resolution.case_id,
        };

        let label = call_label(call);
        match self.create(Resource::PhoneLog, &fields).await {
            Ok(id) => {
                tracing::info!(
                    "Call {} ({:?}, {}s): created completed-call record {}",
                    label,
                    reason,
                    duration,
                    id
                );
                if let Some(ref call_id) = call.call_id {
                    self.store.merge(call_id, CallRecordPatch::phone_log(id));
                }
            }
            Err(e) => {
                tracing::warn!("Call {}: failed to create completed-call record: {}", label, e);
            }
        }

        let Some(ongoing_id) = call
            .call_id
            .as_deref()
            .and_then(|call_id| self.store.get(call_id))
            .and_then(|r| r.telephony_event_id)
        else {
            tracing::debug!("Call {}: no ongoing-call record to close", label);
            return;
        };

        let finish = OngoingCallFinish {
            end_time,
            ongoing: false,
            status: CallStatus::VendorFinish,
        };
        self.update(Resource::TelephonyEvent, &ongoing_id, &finish, label)
            .await;
    }

    async fn on_recording(&self, rec: &RecordingInfo) {
        let url = recording_url(&self.settings.public_base_url, rec.download_url.as_deref());

        match self.store.get(&rec.call_id) {
            Some(record) => {
                if let Some(ref id) = record.telephony_event_id {
                    let fields = OngoingCallRecording {
                        recording_url: url.clone(),
                    };
                    self.update(Resource::TelephonyEvent, id, &fields, &rec.call_id)
                        .await;
                }
                if let Some(ref id) = record.phone_log_id {
                    let fields = CompletedCallRecording {
                        log_type: LogType::Call,
                        recording_url: url.clone(),
                        duration: rec.duration,
                    };
                    self.update(Resource::PhoneLog, id, &fields, &rec.call_id)
                        .await;
                }
            }
            None => {
                tracing::info!(
                    "Call {}: recording ready but no records are known for this call",
                    rec.call_id
                );
            }
        }

        self.store.remove(&rec.call_id);
    }

    async fn on_sms(&self, sms: &SmsInfo) {
        let resolution = self.resolve(&sms.from_number, &sms.to_number).await;

        let fields = SmsRecord {
            log_type: LogType::Sms,
            raw_from_number: sms.from_number.clone(),
            raw_to_number: sms.to_number.clone(),
            text_message: sms.body.clone(),
            involvee_id: resolution.claimant_id,
            staff_id: resolution.staff_id,
            matter_id: resolution.case_id,
            created_at: self.timestamp(sms.sent_at.as_deref()),
            media_params: sms.attachments.clone(),
        };

        let message_id = sms.message_id.as_deref().unwrap_or("?");
        match self.create(Resource::PhoneLog, &fields).await {
            Ok(id) => tracing::info!("Message {}: created message record {}", message_id, id),
            Err(e) => tracing::warn!(
                "Message {}: failed to create message record: {}",
                message_id,
                e
            ),
        }
    }

    /// Case and claimant come from the case party's number; staff from the
    /// other party, falling back to whatever the case lookup found.
    async fn resolve(&self, from: &str, to: &str) -> Resolution {
        let (case_number, staff_number) = self.settings.case_party.split(from, to);

        let mut resolution = self.resolver.resolve_by_phone(case_number).await;
        if let Some(staff_id) = self.resolver.staff_by_phone(staff_number).await {
            resolution.staff_id = Some(staff_id);
        }

        if resolution.is_empty() {
            tracing::debug!(
                "No case or staff match for {} / {}, sending record without them",
                case_number,
                staff_number
            );
        }
        resolution
    }

    fn timestamp(&self, ts: Option<&str>) -> String {
        self.settings.timestamps.format(ts)
    }

    async fn create<T: Serialize>(
        &self,
        resource: Resource,
        fields: &T,
    ) -> Result<RecordId, DownstreamError> {
        let value = serde_json::to_value(fields)?;
        self.api.create(resource, value).await
    }

    async fn update<T: Serialize>(
        &self,
        resource: Resource,
        id: &RecordId,
        fields: &T,
        call_id: &str,
    ) {
        let result = match serde_json::to_value(fields) {
            Ok(value) => self.api.update(resource, id, value).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => tracing::info!("Call {}: updated {} {}", call_id, resource.path(), id),
            Err(e) => tracing::warn!(
                "Call {}: failed to update {} {}: {}",
                call_id,
                resource.path(),
                id,
                e
            ),
        }
    }
}

/// Call id for log lines; calls without one are still relayed.
fn call_label(call: &CallInfo) -> &str {
    call.call_id.as_deref().unwrap_or("<no id>")
}

/// Talk time in whole seconds: `end - answer`, rounded, never negative.
/// Unanswered calls (no answer time) and unparsable timestamps give 0.
pub fn call_duration(answer_start: Option<&str>, end: Option<&str>) -> u64 {
    let (Some(answer), Some(end)) = (
        answer_start.and_then(parse_timestamp),
        end.and_then(parse_timestamp),
    ) else {
        return 0;
    };

    let millis = (end - answer).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 500) / 1000) as u64
    }
}

/// Link to the recording through the relay's public recording endpoint,
/// keyed by the last path segment of the provider download URL.
pub fn recording_url(public_base_url: &str, download_url: Option<&str>) -> String {
    let Some(url) = download_url.filter(|u| !u.is_empty()) else {
        return String::new();
    };
    let id = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    format!("{}/recording/{}", public_base_url.trim_end_matches('/'), id)
}
