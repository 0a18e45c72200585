//! New York State Open Legislation (v3) plugin.

pub mod mapping;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use futures_util::{future, stream, StreamExt, TryStreamExt};
use legisync_core::api::client::PaginatedClient;
use legisync_core::api::transport::HttpTransport;
use legisync_core::api::{params, Params};
use legisync_core::config::SyncConfig;
use legisync_core::models::{CanonicalEntity, EntityType, JurisdictionId, SourceRecord};
use legisync_core::plugin::{Capabilities, InitCell, JurisdictionPlugin, PluginConfig, RecordStream};
use legisync_core::tracker::models::UpdateFeed;
use legisync_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use self::types::UpdateDigestView;

pub const PLUGIN_NAME: &str = "ny_senate";
pub const DEFAULT_BASE_URL: &str = "https://legislation.nysenate.gov/api/3";

const CHAMBERS: [&str; 2] = ["SENATE", "ASSEMBLY"];

pub struct NySenatePlugin {
    jurisdiction: JurisdictionId,
    config: SyncConfig,
    session_year: i32,
    transport: Option<Arc<dyn HttpTransport>>,
    client: InitCell<PaginatedClient>,
}

impl NySenatePlugin {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            jurisdiction: JurisdictionId::new(PLUGIN_NAME)?,
            session_year: mapping::session_year(config.sync_year),
            config: config.clone(),
            transport: None,
            client: InitCell::new(PLUGIN_NAME),
        })
    }

    pub fn with_session_year(mut self, year: i32) -> Self {
        self.session_year = mapping::session_year(year);
        self
    }

    /// Send requests through `transport` instead of a fresh reqwest client.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn session_year(&self) -> i32 {
        self.session_year
    }

    fn client(&self) -> Result<&PaginatedClient> {
        self.client.get()
    }

    /// Stream a paginated collection as source records, dropping those not newer than `since`.
    fn records(
        &self,
        endpoint: String,
        query: Params,
        entity_type: EntityType,
        since: Option<DateTime<Utc>>,
    ) -> Result<RecordStream> {
        let items = self.client()?.fetch_all::<Value>(endpoint, query);
        let records = items.try_filter_map(move |payload| {
            let record = mapping::source_record(entity_type, payload);
            let keep = match (since, record.source_date_time) {
                (Some(since), Some(at)) => at > since,
                _ => true,
            };
            future::ready(Ok(keep.then_some(record)))
        });
        Ok(Box::pin(records))
    }
}

#[async_trait]
impl JurisdictionPlugin for NySenatePlugin {
    fn jurisdiction(&self) -> JurisdictionId {
        self.jurisdiction.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            entity_types: vec![
                EntityType::Legislator,
                EntityType::Committee,
                EntityType::Bill,
                EntityType::Calendar,
                EntityType::Law,
                EntityType::Transcript,
            ],
            update_feeds: vec![EntityType::Bill],
        }
    }

    #[instrument(level = "info", skip(self, config))]
    fn initialize(&self, config: PluginConfig) -> Result<()> {
        if self.client.is_initialized() {
            return Err(Error::Conflict(format!("plugin '{PLUGIN_NAME}' already initialized")));
        }
        let client_config = self
            .config
            .client_config(&config.base_url, &config.api_key)
            .with_offset_base(1);
        let client = match &self.transport {
            Some(transport) => PaginatedClient::new(client_config, transport.clone())?,
            None => PaginatedClient::with_reqwest(
                client_config,
                Duration::from_millis(self.config.http_timeout_ms),
            )?,
        };
        tracing::info!(session_year = self.session_year, base_url = %config.base_url, "ny senate plugin initialized");
        self.client.set(client)
    }

    fn fetch_bills(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream> {
        self.records(
            format!("bills/{}", self.session_year),
            params(&[("full", "true")]),
            EntityType::Bill,
            since,
        )
    }

    fn fetch_members(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream> {
        self.records(
            format!("members/{}", self.session_year),
            params(&[("full", "true")]),
            EntityType::Legislator,
            since,
        )
    }

    fn fetch_committees(&self) -> Result<RecordStream> {
        let [senate, assembly] = CHAMBERS.map(|chamber| {
            self.records(
                format!("committees/{}/{chamber}", self.session_year),
                params(&[("full", "true")]),
                EntityType::Committee,
                None,
            )
        });
        Ok(Box::pin(senate?.chain(assembly?)))
    }

    fn fetch_calendars(&self, year: i32) -> Result<RecordStream> {
        self.records(format!("calendars/{year}"), Vec::new(), EntityType::Calendar, None)
    }

    fn fetch_laws(&self, law_id: &str) -> Result<RecordStream> {
        let client = self.client()?.clone();
        let endpoint = format!("laws/{}", law_id.trim().to_ascii_uppercase());
        let once = stream::once(async move {
            let tree: Value = client.fetch_one(&endpoint, &params(&[("full", "true")])).await?;
            Ok(mapping::source_record(EntityType::Law, tree))
        });
        Ok(Box::pin(once))
    }

    fn fetch_transcripts(&self, year: i32) -> Result<RecordStream> {
        self.records(
            format!("transcripts/{year}"),
            params(&[("full", "true")]),
            EntityType::Transcript,
            None,
        )
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch_updates(
        &self,
        entity_type: EntityType,
        since: DateTime<Utc>,
    ) -> Result<Option<UpdateFeed>> {
        if entity_type != EntityType::Bill {
            return Ok(None);
        }
        let client = self.client()?;
        let now = Utc::now();
        // The upstream rejects ranges that end before they start.
        let to = if now > since { now } else { since };
        let endpoint = format!(
            "bills/updates/{}/{}",
            mapping::format_timestamp(since),
            mapping::format_timestamp(to)
        );
        let raw: Vec<Value> = client
            .fetch_all(endpoint, params(&[("detail", "true"), ("type", "published")]))
            .try_collect()
            .await?;

        // Stand-in time for entries without a readable one: just past `since`, so a
        // failed refetch holds the watermark where it is.
        let fallback_at = since + TimeDelta::microseconds(1);
        let mut feed = UpdateFeed::default();
        for item in raw {
            let parsed = UpdateDigestView::deserialize(&item)
                .map_err(|e| Error::InvalidInput(e.to_string()))
                .and_then(mapping::digest_from_update);
            match parsed {
                Ok(digest) => feed.digests.push(digest),
                Err(e) => match mapping::refetch_digest(&item, fallback_at) {
                    Some(digest) => {
                        tracing::warn!(id = %digest.token.id, error = %e, "unreadable bill update, refetching the bill");
                        feed.digests.push(digest);
                    }
                    None => {
                        tracing::warn!(error = %e, "bill update names no bill");
                        feed.unreadable.push(mapping::describe_update(&item, &e));
                    }
                },
            }
        }
        tracing::debug!(
            count = feed.digests.len(),
            unreadable = feed.unreadable.len(),
            "bill updates fetched"
        );
        Ok(Some(feed))
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_record(&self, entity_type: EntityType, id: &str) -> Result<Option<SourceRecord>> {
        if entity_type != EntityType::Bill {
            return Err(Error::InvalidInput(format!(
                "{PLUGIN_NAME} cannot fetch single {entity_type} records"
            )));
        }
        let (print_no, session) = mapping::split_bill_id(id)
            .ok_or_else(|| Error::InvalidInput(format!("'{id}' is not a bill id")))?;
        let endpoint = format!("bills/{session}/{print_no}");
        match self
            .client()?
            .fetch_one::<Value>(&endpoint, &params(&[("view", "default")]))
            .await
        {
            Ok(bill) => Ok(Some(mapping::source_record(EntityType::Bill, bill))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn normalize(&self, record: &SourceRecord) -> Result<CanonicalEntity> {
        mapping::normalize(record)
    }
}
