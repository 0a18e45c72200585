//! Raw response shapes of the Open Legislation v3 API (subset).
//!
//! Everything optional upstream is optional here; `mapping` decides what is required.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;

/// `{items: [...], size}` sub-list used throughout the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub size: usize,
}

impl<T> Default for ItemList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            size: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRef {
    pub member_id: u64,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub chamber: Option<String>,
    #[serde(default)]
    pub district_code: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorView {
    #[serde(default)]
    pub member: Option<MemberRef>,
    #[serde(default)]
    pub budget: bool,
    #[serde(default)]
    pub rules_sponsor: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillStatusView {
    #[serde(default)]
    pub status_type: Option<String>,
    #[serde(default)]
    pub status_desc: Option<String>,
    #[serde(default)]
    pub action_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendmentView {
    #[serde(default)]
    pub co_sponsors: ItemList<MemberRef>,
    #[serde(default)]
    pub multi_sponsors: ItemList<MemberRef>,
}

/// Amendments keyed by version letter (`""` is the original print).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AmendmentMap {
    #[serde(default)]
    pub items: BTreeMap<String, AmendmentView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillView {
    pub base_print_no: String,
    pub session: i32,
    #[serde(default)]
    pub print_no: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub active_version: Option<String>,
    #[serde(default)]
    pub published_date_time: Option<String>,
    #[serde(default)]
    pub status: Option<BillStatusView>,
    #[serde(default)]
    pub sponsor: Option<SponsorView>,
    #[serde(default)]
    pub amendments: Option<AmendmentMap>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonView {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub member_id: u64,
    pub chamber: String,
    #[serde(default)]
    pub incumbent: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub session_year: Option<i32>,
    #[serde(default)]
    pub district_code: Option<u32>,
    #[serde(default)]
    pub person: Option<PersonView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeMemberView {
    pub member: MemberRef,
    #[serde(default)]
    pub sequence_no: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeView {
    pub chamber: String,
    pub name: String,
    pub session_year: i32,
    #[serde(default)]
    pub committee_members: ItemList<CommitteeMemberView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarView {
    pub year: i32,
    pub calendar_number: u32,
    #[serde(default)]
    pub cal_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LawInfoView {
    pub law_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub law_type: Option<String>,
    #[serde(default)]
    pub chapter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LawDocView {
    pub location_id: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub documents: ItemList<LawDocView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LawTreeView {
    pub info: LawInfoView,
    #[serde(default)]
    pub documents: Option<LawDocView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptView {
    pub date_time: String,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillIdView {
    pub base_print_no: String,
    pub session: i32,
}

/// One entry of `bills/updates/{from}/{to}?detail=true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDigestView {
    pub id: BillIdView,
    #[serde(default)]
    pub content_type: Option<String>,
    pub source_id: String,
    pub source_date_time: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub fields: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub field_count: Option<usize>,
}
