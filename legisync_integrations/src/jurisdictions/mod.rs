//! Optional jurisdictions implementing the core `JurisdictionPlugin` trait.

#[cfg(feature = "ny_senate")]
pub mod ny_senate;
