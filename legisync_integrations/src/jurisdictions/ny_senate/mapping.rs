use chrono::{DateTime, NaiveDateTime, Utc};
use legisync_core::models::{
    Bill, Calendar, CanonicalEntity, Chamber, Committee, EntityType, Law, LawDocument,
    Legislator, SourceRecord, SponsorRef, SponsorRole, Transcript,
};
use legisync_core::tracker::models::{DigestAction, DigestScope, DigestUpdate, UpdateToken};
use legisync_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

use super::types::{
    BillView, CalendarView, CommitteeView, LawDocView, LawTreeView, MemberRef, MemberView,
    TranscriptView, UpdateDigestView,
};

/// Key used when a payload is too broken to name itself; `normalize` then reports it.
const UNKEYED: &str = "unkeyed";

/// Digest field names that map 1:1 onto canonical bill fields.
const BILL_FIELDS: [&str; 4] = ["title", "summary", "status", "active_version"];

/// Legislative sessions span two years and are named after the odd one.
pub fn session_year(year: i32) -> i32 {
    if year % 2 == 0 {
        year - 1
    } else {
        year
    }
}

pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Upstream timestamps carry no zone; they are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
}

/// Path-safe form of a timestamp for the updates endpoint.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn chamber(raw: &str) -> Option<Chamber> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SENATE" => Some(Chamber::Upper),
        "ASSEMBLY" => Some(Chamber::Lower),
        _ => None,
    }
}

pub fn bill_id(base_print_no: &str, session: i32) -> String {
    format!("{base_print_no}-{session}")
}

/// Inverse of [`bill_id`].
pub fn split_bill_id(id: &str) -> Option<(&str, i32)> {
    let (print_no, session) = id.rsplit_once('-')?;
    if print_no.is_empty() {
        return None;
    }
    Some((print_no, session.parse().ok()?))
}

/// Wrap a raw list item, pulling out its key and change time. Never fails: a payload
/// without a usable key is still emitted so that `normalize` can reject it by name.
#[tracing::instrument(level = "debug", skip_all)]
pub fn source_record(entity_type: EntityType, payload: Value) -> SourceRecord {
    let s = |v: &Value, k: &str| v.get(k).and_then(Value::as_str).map(str::to_string);
    let n = |v: &Value, k: &str| v.get(k).and_then(Value::as_i64);

    let (key, when) = match entity_type {
        EntityType::Bill => (
            s(&payload, "basePrintNo")
                .zip(n(&payload, "session"))
                .map(|(p, y)| bill_id(&p, y as i32)),
            s(&payload, "publishedDateTime").and_then(|t| parse_timestamp(&t)),
        ),
        EntityType::Legislator => (n(&payload, "memberId").map(|id| id.to_string()), None),
        EntityType::Committee => (
            s(&payload, "chamber")
                .zip(s(&payload, "name"))
                .map(|(c, name)| format!("{c}/{name}")),
            None,
        ),
        EntityType::Calendar => (
            n(&payload, "year")
                .zip(n(&payload, "calendarNumber"))
                .map(|(y, no)| format!("{y}-{no}")),
            None,
        ),
        EntityType::Law => (
            payload
                .get("info")
                .and_then(|info| s(info, "lawId")),
            None,
        ),
        EntityType::Transcript => {
            let raw = s(&payload, "dateTime");
            let when = raw.as_deref().and_then(parse_timestamp);
            (raw, when)
        }
        EntityType::Sponsorship => (None, None),
    };

    SourceRecord {
        entity_type,
        key: key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| UNKEYED.to_string()),
        source_date_time: when,
        payload,
    }
}

fn decode<T: DeserializeOwned>(record: &SourceRecord) -> Result<T> {
    serde_json::from_value(record.payload.clone())
        .map_err(|e| Error::malformed(record.entity_type, &record.key, e.to_string()))
}

fn required(record: &SourceRecord, field: &str, value: Option<String>) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::malformed(record.entity_type, &record.key, format!("{field} is missing")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[tracing::instrument(level = "debug", skip_all, fields(entity_type = %record.entity_type, key = %record.key))]
pub fn normalize(record: &SourceRecord) -> Result<CanonicalEntity> {
    match record.entity_type {
        EntityType::Bill => map_bill(record).map(CanonicalEntity::Bill),
        EntityType::Legislator => map_member(record).map(CanonicalEntity::Legislator),
        EntityType::Committee => map_committee(record).map(CanonicalEntity::Committee),
        EntityType::Calendar => map_calendar(record).map(CanonicalEntity::Calendar),
        EntityType::Law => map_law(record).map(CanonicalEntity::Law),
        EntityType::Transcript => map_transcript(record).map(CanonicalEntity::Transcript),
        EntityType::Sponsorship => Err(Error::malformed(
            record.entity_type,
            &record.key,
            "sponsorships are derived from bills",
        )),
    }
}

fn map_bill(record: &SourceRecord) -> Result<Bill> {
    let view: BillView = decode(record)?;
    let base_print_no = required(record, "basePrintNo", Some(view.base_print_no.clone()))?;
    let title = required(record, "title", view.title)?;
    let active_version = view.active_version.unwrap_or_default();

    let mut sponsors: Vec<SponsorRef> = Vec::new();
    let mut push = |member: &MemberRef, role: SponsorRole| {
        let sponsor = SponsorRef {
            legislator_id: member.member_id.to_string(),
            role,
        };
        if !sponsors.contains(&sponsor) {
            sponsors.push(sponsor);
        }
    };
    // Budget and rules bills have no member sponsor.
    if let Some(member) = view.sponsor.as_ref().and_then(|s| s.member.as_ref()) {
        push(member, SponsorRole::Primary);
    }
    if let Some(amendment) = view
        .amendments
        .as_ref()
        .and_then(|a| a.items.get(&active_version))
    {
        for m in &amendment.co_sponsors.items {
            push(m, SponsorRole::Cosponsor);
        }
        for m in &amendment.multi_sponsors.items {
            push(m, SponsorRole::Multisponsor);
        }
    }

    Ok(Bill {
        id: bill_id(&base_print_no, view.session),
        session_year: view.session,
        print_no: base_print_no,
        title,
        summary: non_empty(view.summary),
        status: view.status.and_then(|s| non_empty(s.status_type)),
        active_version,
        published_at: view.published_date_time.as_deref().and_then(parse_timestamp),
        sponsors,
    })
}

fn map_member(record: &SourceRecord) -> Result<Legislator> {
    let view: MemberView = decode(record)?;
    let chamber = chamber(&view.chamber).ok_or_else(|| {
        Error::malformed(record.entity_type, &record.key, format!("unknown chamber '{}'", view.chamber))
    })?;
    let person = view.person.as_ref();
    let full_name = required(
        record,
        "fullName",
        view.full_name
            .clone()
            .or_else(|| person.and_then(|p| p.full_name.clone())),
    )?;
    let session_year = view
        .session_year
        .ok_or_else(|| Error::malformed(record.entity_type, &record.key, "sessionYear is missing"))?;

    Ok(Legislator {
        id: view.member_id.to_string(),
        full_name,
        short_name: view.short_name.unwrap_or_default(),
        chamber,
        district: view.district_code,
        session_year,
        incumbent: view.incumbent,
        email: non_empty(person.and_then(|p| p.email.clone())),
        offices: Vec::new(),
    })
}

fn map_committee(record: &SourceRecord) -> Result<Committee> {
    let view: CommitteeView = decode(record)?;
    let chamber = chamber(&view.chamber).ok_or_else(|| {
        Error::malformed(record.entity_type, &record.key, format!("unknown chamber '{}'", view.chamber))
    })?;
    let name = required(record, "name", Some(view.name))?;

    let mut seats = view.committee_members.items;
    seats.sort_by_key(|seat| seat.sequence_no.unwrap_or(u32::MAX));
    let mut members: Vec<String> = Vec::with_capacity(seats.len());
    for seat in seats {
        let id = seat.member.member_id.to_string();
        if !members.contains(&id) {
            members.push(id);
        }
    }

    Ok(Committee {
        id: format!(
            "{}-{}-{}",
            view.chamber.trim().to_ascii_lowercase(),
            slug(&name),
            view.session_year
        ),
        name,
        chamber,
        session_year: view.session_year,
        members,
    })
}

fn map_calendar(record: &SourceRecord) -> Result<Calendar> {
    let view: CalendarView = decode(record)?;
    Ok(Calendar {
        id: format!("{}-{}", view.year, view.calendar_number),
        year: view.year,
        calendar_number: view.calendar_number,
        date: view.cal_date,
    })
}

fn flatten_docs(doc: &LawDocView, out: &mut Vec<LawDocument>) {
    out.push(LawDocument {
        location_id: doc.location_id.clone(),
        doc_type: doc.doc_type.clone().unwrap_or_default(),
        title: non_empty(doc.title.clone()),
        text: doc.text.clone(),
    });
    for child in &doc.documents.items {
        flatten_docs(child, out);
    }
}

fn map_law(record: &SourceRecord) -> Result<Law> {
    let view: LawTreeView = decode(record)?;
    let id = required(record, "lawId", Some(view.info.law_id))?;
    let mut documents = Vec::new();
    if let Some(root) = &view.documents {
        flatten_docs(root, &mut documents);
    }
    Ok(Law {
        name: non_empty(view.info.name).unwrap_or_else(|| id.clone()),
        id,
        law_type: non_empty(view.info.law_type),
        chapter: non_empty(view.info.chapter),
        documents,
    })
}

fn map_transcript(record: &SourceRecord) -> Result<Transcript> {
    let view: TranscriptView = decode(record)?;
    let date_time = parse_timestamp(&view.date_time).ok_or_else(|| {
        Error::malformed(
            record.entity_type,
            &record.key,
            format!("unparseable dateTime '{}'", view.date_time),
        )
    })?;
    Ok(Transcript {
        id: view.date_time.trim().to_string(),
        date_time,
        session_type: non_empty(view.session_type),
        location: non_empty(view.location),
        text: view.text,
    })
}

fn digest_action(raw: Option<&str>) -> Option<DigestAction> {
    match raw.map(|a| a.trim().to_ascii_uppercase()).as_deref() {
        Some("INSERT") => Some(DigestAction::Insert),
        Some("UPDATE") | None => Some(DigestAction::Update),
        Some("DELETE") => Some(DigestAction::Delete),
        _ => None,
    }
}

fn field_name(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Turn one upstream bill update into a digest.
///
/// Root-scope (`Bill`) digests keep their action and describe the whole record. A
/// sub-scope digest becomes a field digest only if every field it touches is a canonical
/// bill field; anything else is turned into a whole-record update so that the bill is
/// re-fetched rather than wrongly retired.
///
/// When the upstream `fieldCount` disagrees with the fields it sent, the digest keeps
/// the raw fields and the reported count, and fails `DigestUpdate::validate`.
#[tracing::instrument(level = "debug", skip_all)]
pub fn digest_from_update(view: UpdateDigestView) -> Result<DigestUpdate> {
    if let Some(ct) = view.content_type.as_deref() {
        if !ct.eq_ignore_ascii_case("BILL") {
            return Err(Error::InvalidInput(format!("unexpected update content type '{ct}'")));
        }
    }
    let when = parse_timestamp(&view.source_date_time).ok_or_else(|| {
        Error::InvalidInput(format!(
            "unparseable sourceDateTime '{}'",
            view.source_date_time
        ))
    })?;
    let action = digest_action(view.action.as_deref()).ok_or_else(|| {
        Error::InvalidInput(format!("unknown update action {:?}", view.action))
    })?;
    let token = UpdateToken::new(
        bill_id(view.id.base_print_no.trim(), view.id.session),
        EntityType::Bill,
        view.source_id,
        when,
    )?;

    let raw = view.fields.unwrap_or_default();
    if let Some(reported) = view.field_count.filter(|n| *n != raw.len()) {
        return Ok(DigestUpdate::new(token, action, DigestScope::Field, raw)
            .with_reported_field_count(reported));
    }

    let root = view
        .scope
        .as_deref()
        .map(|s| s.trim().eq_ignore_ascii_case("bill"))
        .unwrap_or(true);
    if root {
        return Ok(DigestUpdate::new(token, action, DigestScope::Record, BTreeMap::new()));
    }

    let mapped: BTreeMap<String, Value> = raw
        .iter()
        .map(|(k, v)| (field_name(k), v.clone()))
        .filter(|(k, _)| BILL_FIELDS.contains(&k.as_str()))
        .collect();
    if raw.is_empty() || mapped.len() != raw.len() {
        return Ok(DigestUpdate::from_token(token));
    }
    Ok(DigestUpdate::new(token, action, DigestScope::Field, mapped))
}

/// Fallback for a feed entry that does not read as an update: if it still names a
/// bill, re-fetch that bill. `at` stands in for a missing or unreadable source time.
pub fn refetch_digest(item: &Value, at: DateTime<Utc>) -> Option<DigestUpdate> {
    let id = item.get("id")?;
    let print_no = id.get("basePrintNo")?.as_str()?.trim();
    let session = i32::try_from(id.get("session")?.as_i64()?).ok()?;
    if print_no.is_empty() {
        return None;
    }
    let source_id = item
        .get("sourceId")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("unreadable-update");
    let when = item
        .get("sourceDateTime")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(at);
    let token = UpdateToken::new(bill_id(print_no, session), EntityType::Bill, source_id, when).ok()?;
    Some(DigestUpdate::from_token(token))
}

/// One-line description of a feed entry nothing could be made of.
pub fn describe_update(item: &Value, error: &Error) -> String {
    let source = item
        .get("sourceId")
        .and_then(Value::as_str)
        .unwrap_or("<no sourceId>");
    format!("{source}: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn bill_payload() -> Value {
        json!({
            "basePrintNo": "S1234",
            "session": 2025,
            "printNo": "S1234A",
            "title": "Relates to school bus cameras",
            "summary": "",
            "activeVersion": "A",
            "publishedDateTime": "2025-01-08T10:12:33",
            "status": {"statusType": "IN_SENATE_COMM", "statusDesc": "In Senate Committee"},
            "sponsor": {"member": {"memberId": 371, "shortName": "SMITH"}, "budget": false},
            "amendments": {"items": {
                "": {"coSponsors": {"items": [{"memberId": 9}], "size": 1}},
                "A": {
                    "coSponsors": {"items": [{"memberId": 402}, {"memberId": 371}], "size": 2},
                    "multiSponsors": {"items": [{"memberId": 55}], "size": 1}
                }
            }}
        })
    }

    #[test]
    fn session_year_is_the_odd_year() {
        assert_eq!(session_year(2025), 2025);
        assert_eq!(session_year(2026), 2025);
    }

    #[test]
    fn zone_less_timestamps_are_utc() {
        let t = parse_timestamp("2025-01-08T10:12:33.250").unwrap();
        assert_eq!(t.timestamp_millis(), Utc.with_ymd_and_hms(2025, 1, 8, 10, 12, 33).unwrap().timestamp_millis() + 250);
        assert_eq!(
            parse_timestamp("2025-01-08T15:00"),
            Some(Utc.with_ymd_and_hms(2025, 1, 8, 15, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2025-01-08T10:00:00-05:00"),
            Some(Utc.with_ymd_and_hms(2025, 1, 8, 15, 0, 0).unwrap())
        );
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[test]
    fn bill_maps_sponsors_from_the_active_amendment() {
        let record = source_record(EntityType::Bill, bill_payload());
        assert_eq!(record.key, "S1234-2025");
        assert_eq!(record.source_date_time, parse_timestamp("2025-01-08T10:12:33"));

        let CanonicalEntity::Bill(bill) = normalize(&record).unwrap() else {
            panic!("expected a bill");
        };
        assert_eq!(bill.id, "S1234-2025");
        assert_eq!(bill.print_no, "S1234");
        assert_eq!(bill.summary, None);
        assert_eq!(bill.status.as_deref(), Some("IN_SENATE_COMM"));
        let got: Vec<(&str, SponsorRole)> = bill
            .sponsors
            .iter()
            .map(|s| (s.legislator_id.as_str(), s.role))
            .collect();
        assert_eq!(
            got,
            vec![
                ("371", SponsorRole::Primary),
                ("402", SponsorRole::Cosponsor),
                ("371", SponsorRole::Cosponsor),
                ("55", SponsorRole::Multisponsor),
            ]
        );
    }

    #[test]
    fn bill_without_title_is_malformed() {
        let mut payload = bill_payload();
        payload["title"] = json!("  ");
        let err = normalize(&source_record(EntityType::Bill, payload)).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { ref key, .. } if key == "S1234-2025"));
    }

    #[test]
    fn unkeyed_payloads_are_reported_not_dropped() {
        let record = source_record(EntityType::Bill, json!({"title": "orphan"}));
        assert_eq!(record.key, UNKEYED);
        assert!(matches!(normalize(&record), Err(Error::MalformedRecord { .. })));
    }

    #[test]
    fn member_maps_chamber_and_person() {
        let record = source_record(
            EntityType::Legislator,
            json!({
                "memberId": 1093,
                "chamber": "ASSEMBLY",
                "incumbent": true,
                "fullName": "Jo Rivera",
                "shortName": "RIVERA",
                "sessionYear": 2025,
                "districtCode": 74,
                "person": {"email": "rivera@example.test"}
            }),
        );
        let CanonicalEntity::Legislator(m) = normalize(&record).unwrap() else {
            panic!("expected a legislator");
        };
        assert_eq!(m.id, "1093");
        assert_eq!(m.chamber, Chamber::Lower);
        assert_eq!(m.district, Some(74));
        assert_eq!(m.email.as_deref(), Some("rivera@example.test"));

        let bad = source_record(
            EntityType::Legislator,
            json!({"memberId": 5, "chamber": "HOUSE", "fullName": "X", "sessionYear": 2025}),
        );
        assert!(normalize(&bad).is_err());
    }

    #[test]
    fn committee_id_and_member_order() {
        let record = source_record(
            EntityType::Committee,
            json!({
                "chamber": "SENATE",
                "name": "Investigations & Government Operations",
                "sessionYear": 2025,
                "committeeMembers": {"items": [
                    {"member": {"memberId": 20}, "sequenceNo": 2},
                    {"member": {"memberId": 10}, "sequenceNo": 1, "title": "CHAIR_PERSON"}
                ]}
            }),
        );
        assert_eq!(record.key, "SENATE/Investigations & Government Operations");
        let CanonicalEntity::Committee(c) = normalize(&record).unwrap() else {
            panic!("expected a committee");
        };
        assert_eq!(c.id, "senate-investigations-government-operations-2025");
        assert_eq!(c.members, vec!["10", "20"]);
    }

    #[test]
    fn law_tree_is_flattened_depth_first() {
        let record = source_record(
            EntityType::Law,
            json!({
                "info": {"lawId": "PEN", "name": "Penal", "lawType": "CONSOLIDATED", "chapter": "40"},
                "documents": {
                    "locationId": "-", "docType": "CHAPTER", "title": "Penal",
                    "documents": {"items": [
                        {"locationId": "P1", "docType": "PART",
                         "documents": {"items": [{"locationId": "1.00", "docType": "SECTION", "text": "..."}]}},
                        {"locationId": "P2", "docType": "PART"}
                    ]}
                }
            }),
        );
        let CanonicalEntity::Law(law) = normalize(&record).unwrap() else {
            panic!("expected a law");
        };
        let ids: Vec<&str> = law.documents.iter().map(|d| d.location_id.as_str()).collect();
        assert_eq!(ids, vec!["-", "P1", "1.00", "P2"]);
        assert_eq!(law.chapter.as_deref(), Some("40"));
    }

    #[test]
    fn calendar_and_transcript_ids() {
        let cal = normalize(&source_record(
            EntityType::Calendar,
            json!({"year": 2025, "calendarNumber": 12, "calDate": "2025-03-04"}),
        ))
        .unwrap();
        assert_eq!(cal.id(), "2025-12");
        let CanonicalEntity::Calendar(cal) = cal else { unreachable!() };
        assert_eq!(cal.date, NaiveDate::from_ymd_opt(2025, 3, 4));

        let record = source_record(
            EntityType::Transcript,
            json!({"dateTime": "2025-01-08T15:00", "sessionType": "REGULAR SESSION"}),
        );
        assert!(record.source_date_time.is_some());
        assert_eq!(normalize(&record).unwrap().id(), "2025-01-08T15:00");
    }

    fn update(scope: &str, action: &str, fields: Value) -> UpdateDigestView {
        serde_json::from_value(json!({
            "id": {"basePrintNo": "S1234", "session": 2025},
            "contentType": "BILL",
            "sourceId": "SOBI.D250108.T101233.TXT-0-BILL",
            "sourceDateTime": "2025-01-08T10:12:33",
            "action": action,
            "scope": scope,
            "fields": fields,
        }))
        .unwrap()
    }

    #[test]
    fn root_scope_delete_retires_the_bill() {
        let d = digest_from_update(update("Bill", "DELETE", json!({}))).unwrap();
        assert_eq!(d.token.id, "S1234-2025");
        assert_eq!(d.action, DigestAction::Delete);
        assert_eq!(d.scope, DigestScope::Record);
        assert!(d.token.processed_date_time.is_none());
    }

    #[test]
    fn known_sub_fields_become_field_digests() {
        let d = digest_from_update(update(
            "Bill Amendment",
            "Update",
            json!({"Title": "New title", "Active Version": "B"}),
        ))
        .unwrap();
        assert_eq!(d.scope, DigestScope::Field);
        assert_eq!(d.fields.get("title"), Some(&json!("New title")));
        assert_eq!(d.fields.get("active_version"), Some(&json!("B")));
        assert!(d.validate().is_ok());
    }

    #[test]
    fn unknown_sub_fields_force_a_refetch() {
        let d = digest_from_update(update(
            "Bill Amendment Cosponsor",
            "DELETE",
            json!({"member_id": 402}),
        ))
        .unwrap();
        assert_eq!(d.action, DigestAction::Update);
        assert_eq!(d.scope, DigestScope::Record);
        assert!(d.fields.is_empty());
    }

    #[test]
    fn mismatched_field_count_fails_validation() {
        let mut view = update("Bill Amendment", "Update", json!({"Title": "New title"}));
        view.field_count = Some(3);
        let d = digest_from_update(view).unwrap();
        assert_eq!(d.field_count, 3);
        assert_eq!(d.fields.len(), 1);
        assert!(d.validate().is_err());

        let mut view = update("Bill Amendment", "Update", json!({"Title": "New title"}));
        view.field_count = Some(1);
        assert!(digest_from_update(view).unwrap().validate().is_ok());
    }

    #[test]
    fn unreadable_updates_fall_back_to_a_refetch_when_they_name_a_bill() {
        let fallback = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 1).unwrap();
        let merge = json!({
            "id": {"basePrintNo": "S1234", "session": 2025},
            "sourceId": "SOBI.D250108",
            "sourceDateTime": "2025-01-08T10:12:33",
            "action": "MERGE"
        });
        let d = refetch_digest(&merge, fallback).unwrap();
        assert_eq!(d.token.id, "S1234-2025");
        assert_eq!(d.action, DigestAction::Update);
        assert_eq!(d.scope, DigestScope::Record);
        assert_eq!(
            d.token.source_date_time,
            Utc.with_ymd_and_hms(2025, 1, 8, 10, 12, 33).unwrap()
        );

        let undated = json!({"id": {"basePrintNo": "S9", "session": 2025}, "sourceDateTime": "soon"});
        let d = refetch_digest(&undated, fallback).unwrap();
        assert_eq!(d.token.source_date_time, fallback);
        assert_eq!(d.token.source_id, "unreadable-update");

        let anonymous = json!({"sourceId": "SOBI.D250109", "action": "UPDATE"});
        assert!(refetch_digest(&anonymous, fallback).is_none());
        let err = Error::InvalidInput("missing field `id`".to_string());
        assert_eq!(
            describe_update(&anonymous, &err),
            format!("SOBI.D250109: {err}")
        );
    }

    #[test]
    fn bill_id_round_trips_through_split() {
        assert_eq!(split_bill_id("S1234-2025"), Some(("S1234", 2025)));
        assert_eq!(split_bill_id("S1234"), None);
        assert_eq!(split_bill_id("-2025"), None);
        assert_eq!(slug("  Aging!! & Health "), "aging-health");
    }
}
