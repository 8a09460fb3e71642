//! Phone number to case/claimant/staff resolution

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::client::{CaseClient, DownstreamError};
use super::timestamp::parse_timestamp;
use crate::events::normalize_phone;
use crate::models::RecordId;

/// How long the active-staff directory is reused before refetching.
const STAFF_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Best-effort match for a phone number. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub case_id: Option<RecordId>,
    pub claimant_id: Option<RecordId>,
    pub staff_id: Option<RecordId>,
    /// Name of the case type, e.g. "Personal Injury".
    pub case_type: Option<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.case_id.is_none() && self.claimant_id.is_none() && self.staff_id.is_none()
    }
}

/// Looks up downstream entities by phone number. Never fails: a miss or a
/// lookup error yields empty fields.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve_by_phone(&self, number: &str) -> Resolution;

    /// Staff member owning a number.
    async fn staff_by_phone(&self, number: &str) -> Option<RecordId> {
        self.resolve_by_phone(number).await.staff_id
    }
}

#[derive(Debug, Clone)]
struct StaffEntry {
    id: RecordId,
    numbers: Vec<String>,
}

#[derive(Default)]
struct StaffDirectory {
    people: Vec<StaffEntry>,
    refreshed_at: Option<Instant>,
}

impl StaffDirectory {
    fn is_stale(&self) -> bool {
        self.refreshed_at
            .map_or(true, |at| at.elapsed() >= STAFF_REFRESH_INTERVAL)
    }

    fn find(&self, number: &str) -> Option<RecordId> {
        self.people
            .iter()
            .find(|p| p.numbers.iter().any(|n| n == number))
            .map(|p| p.id.clone())
    }
}

/// [`EntityResolver`] backed by the case-management API's matter and people
/// search endpoints.
pub struct CaseApiResolver {
    client: Arc<CaseClient>,
    staff: RwLock<StaffDirectory>,
}

impl CaseApiResolver {
    pub fn new(client: Arc<CaseClient>) -> Self {
        Self {
            client,
            staff: RwLock::new(StaffDirectory::default()),
        }
    }

    /// Most recently updated matter whose claimant has this phone number.
    async fn find_matter(&self, number: &str) -> Result<Option<serde_json::Value>, DownstreamError> {
        let filters = serde_json::json!({ "claimant_phone": number }).to_string();
        let data = self.client.get_json("matters", &[("filters", filters)]).await?;
        Ok(newest_matter(&data))
    }

    /// Case type name for a matter, via its `case_type_id`.
    async fn case_type(&self, matter_id: &RecordId) -> Result<Option<String>, DownstreamError> {
        let data = self
            .client
            .get_json(&format!("matters/{}", matter_id.as_str()), &[])
            .await?;
        let Some(type_id) = data
            .get("matter")
            .and_then(|m| m.get("case_type_id"))
            .and_then(RecordId::from_json)
        else {
            return Ok(None);
        };

        let filters = format!(r#"{{"id":[{}]}}"#, type_id.as_str());
        let types = self
            .client
            .get_json("matter_types", &[("filters", filters)])
            .await?;

        Ok(types
            .get("matter_types")
            .and_then(|t| t.as_array())
            .and_then(|list| {
                list.iter().find(|t| {
                    t.get("id").and_then(RecordId::from_json).as_ref() == Some(&type_id)
                })
            })
            .and_then(|t| t.get("name"))
            .and_then(|n| n.as_str())
            .map(String::from))
    }

    /// Fetch the active-staff list. `None` when the response has no list.
    async fn fetch_staff(&self) -> Result<Option<Vec<StaffEntry>>, DownstreamError> {
        let data = self
            .client
            .get_json(
                "entities/person/search",
                &[
                    ("filters", r#"{"active_staff":true}"#.to_string()),
                    ("per_page", "1000".to_string()),
                ],
            )
            .await?;

        Ok(data
            .get("people")
            .and_then(|p| p.as_array())
            .map(|people| people.iter().filter_map(parse_staff_entry).collect()))
    }

    async fn lookup_staff(&self, number: &str) -> Option<RecordId> {
        if number.is_empty() {
            return None;
        }

        if self.staff.read().await.is_stale() {
            let mut dir = self.staff.write().await;
            // Requests queued on the write lock find it already refreshed.
            if dir.is_stale() {
                match self.fetch_staff().await {
                    Ok(Some(entries)) => {
                        tracing::info!("Loaded {} active staff members", entries.len());
                        dir.people = entries;
                        dir.refreshed_at = Some(Instant::now());
                    }
                    Ok(None) => tracing::warn!(
                        "Staff search response has no people list, keeping previous directory"
                    ),
                    Err(e) => tracing::warn!("Staff directory refresh failed: {:#}", e),
                }
            }
            return dir.find(number);
        }

        self.staff.read().await.find(number)
    }
}

#[async_trait]
impl EntityResolver for CaseApiResolver {
    async fn resolve_by_phone(&self, number: &str) -> Resolution {
        let mut resolution = Resolution {
            staff_id: self.lookup_staff(number).await,
            ..Resolution::default()
        };
        if number.is_empty() {
            return resolution;
        }

        let matter = match self.find_matter(number).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Matter lookup for {} failed: {:#}", number, e);
                None
            }
        };

        if let Some(matter) = matter {
            resolution.case_id = matter.get("id").and_then(RecordId::from_json);
            resolution.claimant_id = matter.get("claimant_id").and_then(RecordId::from_json);
        }

        if let Some(ref case_id) = resolution.case_id {
            match self.case_type(case_id).await {
                Ok(t) => resolution.case_type = t,
                Err(e) => tracing::warn!("Case type lookup for matter {} failed: {:#}", case_id, e),
            }
        }

        tracing::debug!("Resolved {} -> {:?}", number, resolution);
        resolution
    }

    async fn staff_by_phone(&self, number: &str) -> Option<RecordId> {
        self.lookup_staff(number).await
    }
}

fn parse_staff_entry(person: &serde_json::Value) -> Option<StaffEntry> {
    let id = person.get("id").and_then(RecordId::from_json)?;
    let numbers = person
        .get("phone_numbers_data")
        .and_then(|p| p.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|ph| ph.get("number").and_then(|n| n.as_str()))
                .map(normalize_phone)
                .filter(|n| !n.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Some(StaffEntry { id, numbers })
}

/// Pick the matter with the latest `updated_at`.
fn newest_matter(data: &serde_json::Value) -> Option<serde_json::Value> {
    data.get("matters")?
        .as_array()?
        .iter()
        .max_by_key(|m| {
            m.get("updated_at")
                .and_then(|u| u.as_str())
                .and_then(parse_timestamp)
        })
        .cloned()
}
