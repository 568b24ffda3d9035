//! sentinel-intel: vulnerability intelligence for the Sentinel core.
//!
//! Three independent sources — the KEV catalog of actively-exploited
//! CVEs, EPSS exploitation probabilities, and NVD CVE metadata — are
//! composed by the correlation engine into Vulnerability nodes and
//! `HAS_CVE` edges on discovered services.

pub mod correlate;
pub mod cpe;
pub mod epss;
pub mod kev;
pub mod nvd;

pub use correlate::{CorrelationEngine, CorrelationOutcome};
pub use cpe::CpeDictionary;
pub use epss::{EpssClient, EpssSource, HttpEpssSource};
pub use kev::{HttpKevFeed, KevClient, KevEntry, KevFeed};
pub use nvd::{HttpNvdSource, NvdClient, NvdCveRecord, NvdSource, RateRegime};
