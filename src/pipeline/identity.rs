//! Identity resolution: derive a cédula from the filename, enrich it via the
//! civil registry.
//!
//! Enrichment is strictly best effort. Every failure mode — timeout, non-2xx
//! status, unparseable body, missing name fields — degrades to a
//! non-[`IdentityLookup::Resolved`] outcome and a log line. Nothing in this
//! module can fail a document job.
//!
//! The three-way [`IdentityLookup`] distinguishes "the registry answered and
//! knows nobody by that number" from "the registry could not be reached", so
//! callers can log and count each case separately instead of collapsing both
//! into a single swallowed error.

use crate::schema::{IdentityInfo, NAME_FALLBACK};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Ecuadorian civil-registry lookup endpoint.
pub const DEFAULT_REGISTRY_URL: &str =
    "https://si.secap.gob.ec/sisecap/logeo_web/json/busca_persona_registro_civil.php";

static RE_CEDULA: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{10}").unwrap());

/// Extract a ten-digit identity number from a filename.
///
/// Returns the first contiguous ten-digit run, or `None`. Multiple runs are
/// not disambiguated; uploaders put the cédula first by convention.
pub fn derive_identity_number(filename: &str) -> Option<String> {
    RE_CEDULA.find(filename).map(|m| m.as_str().to_string())
}

/// Outcome of a registry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityLookup {
    /// The registry returned a body with a non-empty given-names field.
    Resolved(IdentityInfo),
    /// The registry answered but had no recognizable data for this number.
    NotFound,
    /// The registry could not be consulted (transport, status, or decode).
    Unavailable(String),
}

/// An identity registry the pipeline can consult.
///
/// The production implementation is [`CivilRegistry`]; tests substitute a
/// scripted fake via [`crate::config::ExtractionConfigBuilder::registry`].
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Look up a ten-digit identity number. Must never return an error —
    /// all failure modes map to a non-`Resolved` variant.
    async fn lookup(&self, number: &str) -> IdentityLookup;
}

/// Registry client backed by the SECAP civil-registry endpoint.
pub struct CivilRegistry {
    client: Client,
    endpoint: String,
}

impl CivilRegistry {
    /// Create a client with a bounded per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl IdentityRegistry for CivilRegistry {
    async fn lookup(&self, number: &str) -> IdentityLookup {
        let response = match self
            .client
            .post(&self.endpoint)
            .form(&[("documento", number), ("tipo", "1")])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(cedula = number, "registry lookup timed out");
                return IdentityLookup::Unavailable("timeout".into());
            }
            Err(e) => {
                warn!(cedula = number, error = %e, "registry lookup failed");
                return IdentityLookup::Unavailable(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(cedula = number, %status, "registry returned non-success status");
            return IdentityLookup::Unavailable(format!("HTTP {status}"));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(cedula = number, error = %e, "registry body is not valid JSON");
                return IdentityLookup::Unavailable(format!("invalid JSON body: {e}"));
            }
        };

        let outcome = classify_registry_body(number, &body);
        match &outcome {
            IdentityLookup::Resolved(info) => {
                debug!(cedula = number, nombres = %info.nombres, "registry resolved identity")
            }
            IdentityLookup::NotFound => {
                debug!(cedula = number, "registry has no data for this number")
            }
            IdentityLookup::Unavailable(_) => unreachable!("classification never yields Unavailable"),
        }
        outcome
    }
}

/// Decide whether a decoded registry body resolves an identity.
///
/// A recognizable body is a JSON object with a non-empty `nombres` string;
/// anything else is [`IdentityLookup::NotFound`]. A missing or blank
/// `apellidos` field still resolves, but the surnames carry the
/// [`NAME_FALLBACK`] value — an empty surname must never reach a record.
pub(crate) fn classify_registry_body(number: &str, body: &Value) -> IdentityLookup {
    let nombres = body
        .get("nombres")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    if nombres.is_empty() {
        return IdentityLookup::NotFound;
    }

    let apellidos = body
        .get("apellidos")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let apellidos = if apellidos.is_empty() {
        NAME_FALLBACK
    } else {
        apellidos
    };

    IdentityLookup::Resolved(IdentityInfo {
        cedula: number.to_string(),
        nombres: nombres.to_string(),
        apellidos: apellidos.to_string(),
    })
}
