//! Bill-to-legislator link resolution.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{Bill, EntityKey, EntityType, JurisdictionId, SponsorRef, Sponsorship};
use crate::store::CanonicalStore;
use crate::Result;

/// A sponsor link waiting for its legislator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingLink {
    pub bill_id: String,
    pub session_year: i32,
    pub sponsor: SponsorRef,
}

impl PendingLink {
    pub fn from_bill(bill: &Bill) -> Vec<Self> {
        bill.sponsors
            .iter()
            .map(|sponsor| Self {
                bill_id: bill.id.clone(),
                session_year: bill.session_year,
                sponsor: sponsor.clone(),
            })
            .collect()
    }

    pub fn sponsorship(&self) -> Sponsorship {
        Sponsorship::link(&self.bill_id, self.session_year, &self.sponsor)
    }
}

/// How the legislator task of this run ended, as seen by the sponsor pass.
#[derive(Debug, Clone, Default)]
pub enum LegislatorState {
    /// Not part of this run: fall back to what the store already holds.
    #[default]
    NotRequested,
    /// The task finished. `failed` holds the ids whose own sync did not land.
    Succeeded {
        written: HashSet<String>,
        failed: HashSet<String>,
    },
    Failed { written: HashSet<String> },
}

impl LegislatorState {
    /// A link resolves when its legislator was written in this run, or when the
    /// stored copy can be trusted: the task did not run, or it succeeded and this
    /// legislator was not among its failures.
    pub async fn is_known(
        &self,
        store: &dyn CanonicalStore,
        jurisdiction: &JurisdictionId,
        legislator_id: &str,
    ) -> Result<bool> {
        match self {
            LegislatorState::Succeeded { written, .. } | LegislatorState::Failed { written }
                if written.contains(legislator_id) =>
            {
                return Ok(true);
            }
            LegislatorState::Failed { .. } => return Ok(false),
            LegislatorState::Succeeded { failed, .. } if failed.contains(legislator_id) => {
                return Ok(false);
            }
            _ => {}
        }
        store
            .contains(&EntityKey::new(
                jurisdiction.clone(),
                EntityType::Legislator,
                legislator_id,
            ))
            .await
    }
}

/// Drop duplicate links, keeping first-seen order.
pub fn dedupe(links: Vec<PendingLink>) -> Vec<PendingLink> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|l| seen.insert(l.sponsorship().id))
        .collect()
}
