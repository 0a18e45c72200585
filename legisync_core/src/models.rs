use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Identifier of a legislative source, e.g. `ny_senate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JurisdictionId(String);

impl JurisdictionId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("jurisdiction id is empty".to_string()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(Error::InvalidInput(format!(
                "jurisdiction id '{id}' must be lowercase ascii, digits, '_' or '-'"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JurisdictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JurisdictionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Kinds of canonical entities the engine synchronizes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Legislator,
    Committee,
    Bill,
    Sponsorship,
    Calendar,
    Law,
    Transcript,
}

impl EntityType {
    /// Order in which a jurisdiction's entity types are swept. Legislators must commit
    /// before bills so that sponsor links can be resolved.
    pub const SYNC_ORDER: [EntityType; 7] = [
        EntityType::Legislator,
        EntityType::Committee,
        EntityType::Bill,
        EntityType::Sponsorship,
        EntityType::Calendar,
        EntityType::Law,
        EntityType::Transcript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Legislator => "legislator",
            EntityType::Committee => "committee",
            EntityType::Bill => "bill",
            EntityType::Sponsorship => "sponsorship",
            EntityType::Calendar => "calendar",
            EntityType::Law => "law",
            EntityType::Transcript => "transcript",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityType::SYNC_ORDER
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity type '{s}'")))
    }
}

/// Store key of a canonical entity: ids are unique per jurisdiction and entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub jurisdiction: JurisdictionId,
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityKey {
    pub fn new(jurisdiction: JurisdictionId, entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            jurisdiction,
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.jurisdiction, self.entity_type, self.id)
    }
}

/// A raw payload pulled from an upstream API for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub entity_type: EntityType,
    /// Upstream identity of the record, used for logging and malformed-record reports.
    pub key: String,
    /// When the upstream last changed this record, if it says.
    pub source_date_time: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl SourceRecord {
    pub fn new(
        entity_type: EntityType,
        key: impl Into<String>,
        source_date_time: Option<DateTime<Utc>>,
        payload: serde_json::Value,
    ) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::malformed(entity_type, key, "record key is empty"));
        }
        Ok(Self {
            entity_type,
            key,
            source_date_time,
            payload,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chamber {
    Upper,
    Lower,
    Joint,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Office {
    pub label: String,
    pub address: String,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SponsorRole {
    Primary,
    Cosponsor,
    Multisponsor,
}

impl SponsorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SponsorRole::Primary => "primary",
            SponsorRole::Cosponsor => "cosponsor",
            SponsorRole::Multisponsor => "multisponsor",
        }
    }
}

/// Reference from a bill to a legislator by canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SponsorRef {
    pub legislator_id: String,
    pub role: SponsorRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: String,
    pub session_year: i32,
    pub print_no: String,
    pub title: String,
    pub summary: Option<String>,
    pub status: Option<String>,
    pub active_version: String,
    pub published_at: Option<DateTime<Utc>>,
    pub sponsors: Vec<SponsorRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legislator {
    pub id: String,
    pub full_name: String,
    pub short_name: String,
    pub chamber: Chamber,
    pub district: Option<u32>,
    pub session_year: i32,
    pub incumbent: bool,
    pub email: Option<String>,
    pub offices: Vec<Office>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub id: String,
    pub name: String,
    pub chamber: Chamber,
    pub session_year: i32,
    /// Legislator ids, in upstream seniority order.
    pub members: Vec<String>,
}

/// Resolved bill-to-legislator link, written by the sponsor pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sponsorship {
    pub id: String,
    pub bill_id: String,
    pub legislator_id: String,
    pub role: SponsorRole,
    pub session_year: i32,
}

impl Sponsorship {
    pub fn link(bill_id: &str, session_year: i32, sponsor: &SponsorRef) -> Self {
        Self {
            id: format!(
                "{bill_id}:{}:{}",
                sponsor.role.as_str(),
                sponsor.legislator_id
            ),
            bill_id: bill_id.to_string(),
            legislator_id: sponsor.legislator_id.clone(),
            role: sponsor.role,
            session_year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub year: i32,
    pub calendar_number: u32,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawDocument {
    pub location_id: String,
    pub doc_type: String,
    pub title: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Law {
    pub id: String,
    pub name: String,
    pub law_type: Option<String>,
    pub chapter: Option<String>,
    pub documents: Vec<LawDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub date_time: DateTime<Utc>,
    pub session_type: Option<String>,
    pub location: Option<String>,
    pub text: Option<String>,
}

/// Store-ready representation of a legislative record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum CanonicalEntity {
    Legislator(Legislator),
    Committee(Committee),
    Bill(Bill),
    Sponsorship(Sponsorship),
    Calendar(Calendar),
    Law(Law),
    Transcript(Transcript),
}

impl CanonicalEntity {
    pub fn id(&self) -> &str {
        match self {
            CanonicalEntity::Legislator(e) => &e.id,
            CanonicalEntity::Committee(e) => &e.id,
            CanonicalEntity::Bill(e) => &e.id,
            CanonicalEntity::Sponsorship(e) => &e.id,
            CanonicalEntity::Calendar(e) => &e.id,
            CanonicalEntity::Law(e) => &e.id,
            CanonicalEntity::Transcript(e) => &e.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            CanonicalEntity::Legislator(_) => EntityType::Legislator,
            CanonicalEntity::Committee(_) => EntityType::Committee,
            CanonicalEntity::Bill(_) => EntityType::Bill,
            CanonicalEntity::Sponsorship(_) => EntityType::Sponsorship,
            CanonicalEntity::Calendar(_) => EntityType::Calendar,
            CanonicalEntity::Law(_) => EntityType::Law,
            CanonicalEntity::Transcript(_) => EntityType::Transcript,
        }
    }

    /// Session or calendar year the entity belongs to, where one applies.
    pub fn session_year(&self) -> Option<i32> {
        match self {
            CanonicalEntity::Legislator(e) => Some(e.session_year),
            CanonicalEntity::Committee(e) => Some(e.session_year),
            CanonicalEntity::Bill(e) => Some(e.session_year),
            CanonicalEntity::Sponsorship(e) => Some(e.session_year),
            CanonicalEntity::Calendar(e) => Some(e.year),
            CanonicalEntity::Law(_) => None,
            CanonicalEntity::Transcript(_) => None,
        }
    }

    pub fn key(&self, jurisdiction: &JurisdictionId) -> EntityKey {
        EntityKey::new(jurisdiction.clone(), self.entity_type(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jurisdiction_id_rejects_uppercase_and_empty() {
        assert!(JurisdictionId::new("ny_senate").is_ok());
        assert!(JurisdictionId::new("NY Senate").is_err());
        assert!(JurisdictionId::new("  ").is_err());
    }

    #[test]
    fn entity_type_parses_case_insensitively() {
        assert_eq!("Bill".parse::<EntityType>().unwrap(), EntityType::Bill);
        assert_eq!(
            " legislator ".parse::<EntityType>().unwrap(),
            EntityType::Legislator
        );
        assert!("senator".parse::<EntityType>().is_err());
    }

    #[test]
    fn sync_order_puts_legislators_before_bills_before_sponsorships() {
        let pos = |t| EntityType::SYNC_ORDER.iter().position(|x| *x == t).unwrap();
        assert!(pos(EntityType::Legislator) < pos(EntityType::Bill));
        assert!(pos(EntityType::Bill) < pos(EntityType::Sponsorship));
    }

    #[test]
    fn sponsorship_link_id_is_stable() {
        let link = Sponsorship::link(
            "S1234-2025",
            2025,
            &SponsorRef {
                legislator_id: "1093".to_string(),
                role: SponsorRole::Cosponsor,
            },
        );
        assert_eq!(link.id, "S1234-2025:cosponsor:1093");
        assert_eq!(link, Sponsorship::link("S1234-2025", 2025, &SponsorRef {
            legislator_id: "1093".to_string(),
            role: SponsorRole::Cosponsor,
        }));
    }

    #[test]
    fn canonical_entity_serializes_with_type_tag() {
        let e = CanonicalEntity::Calendar(Calendar {
            id: "2025-12".to_string(),
            year: 2025,
            calendar_number: 12,
            date: None,
        });
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["entity_type"], "calendar");
        assert_eq!(v["id"], "2025-12");
        assert_eq!(e.key(&JurisdictionId::new("ny_senate").unwrap()).to_string(), "ny_senate/calendar/2025-12");
    }
}
