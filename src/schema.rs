//! The fixed extraction schema and the record types built from it.
//!
//! Every certificate — however badly scanned — produces a record with exactly
//! the same ten fields. Fields the model could not read carry the sentinel
//! value instead of being omitted, so downstream consumers never need to
//! handle missing keys. The serialized key names are part of the wire
//! contract with the consuming frontend and must not change.

use serde::{Deserialize, Serialize};

/// Placeholder for any schema field the model did not populate.
pub const SENTINEL: &str = "No especificado";

/// `cedula` value when no identity number could be derived from the filename.
pub const CEDULA_FALLBACK: &str = "No detectada";

/// `nombre` / `apellido` value when the registry lookup did not resolve.
pub const NAME_FALLBACK: &str = "Sin datos";

/// The ten extraction fields, in the order they appear in the prompt and in
/// serialized output.
pub const FIELD_KEYS: [&str; 10] = [
    "aptitudMedica",
    "diagnostico1",
    "cie10_diagnostico1",
    "observaciones1",
    "diagnostico2",
    "cie10_diagnostico2",
    "observaciones2",
    "hallazgoMetabolico",
    "hallazgoOsteomuscular",
    "otrosAntecedentes",
];

/// The ten fields extracted from a certificate.
///
/// [`Default`] yields the all-sentinel record; the normalizer overlays
/// whatever the model managed to produce on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFields {
    /// Fitness verdict from the "APTITUD MÉDICA" section.
    #[serde(rename = "aptitudMedica")]
    pub aptitud_medica: String,

    /// First diagnosis, full description.
    #[serde(rename = "diagnostico1")]
    pub diagnostico1: String,

    /// Bare ICD-10 code for the first diagnosis (e.g. "I089", no prefix).
    #[serde(rename = "cie10_diagnostico1")]
    pub cie10_diagnostico1: String,

    /// Observations / limitations attached to the first diagnosis.
    #[serde(rename = "observaciones1")]
    pub observaciones1: String,

    /// Second diagnosis, if present.
    #[serde(rename = "diagnostico2")]
    pub diagnostico2: String,

    /// Bare ICD-10 code for the second diagnosis.
    #[serde(rename = "cie10_diagnostico2")]
    pub cie10_diagnostico2: String,

    /// Observations attached to the second diagnosis.
    #[serde(rename = "observaciones2")]
    pub observaciones2: String,

    /// Metabolic findings (glucose, triglycerides, cholesterol) with values.
    #[serde(rename = "hallazgoMetabolico")]
    pub hallazgo_metabolico: String,

    /// Musculoskeletal findings from the physical exam or X-ray results.
    #[serde(rename = "hallazgoOsteomuscular")]
    pub hallazgo_osteomuscular: String,

    /// Personal antecedents: surgeries and allergies.
    #[serde(rename = "otrosAntecedentes")]
    pub otros_antecedentes: String,
}

impl Default for CertificateFields {
    fn default() -> Self {
        Self {
            aptitud_medica: SENTINEL.to_string(),
            diagnostico1: SENTINEL.to_string(),
            cie10_diagnostico1: SENTINEL.to_string(),
            observaciones1: SENTINEL.to_string(),
            diagnostico2: SENTINEL.to_string(),
            cie10_diagnostico2: SENTINEL.to_string(),
            observaciones2: SENTINEL.to_string(),
            hallazgo_metabolico: SENTINEL.to_string(),
            hallazgo_osteomuscular: SENTINEL.to_string(),
            otros_antecedentes: SENTINEL.to_string(),
        }
    }
}

impl CertificateFields {
    /// Set the field named by its serialized key. Returns `false` for keys
    /// outside the schema, which callers ignore rather than reject.
    pub fn set_field(&mut self, key: &str, value: &str) -> bool {
        let slot = match key {
            "aptitudMedica" => &mut self.aptitud_medica,
            "diagnostico1" => &mut self.diagnostico1,
            "cie10_diagnostico1" => &mut self.cie10_diagnostico1,
            "observaciones1" => &mut self.observaciones1,
            "diagnostico2" => &mut self.diagnostico2,
            "cie10_diagnostico2" => &mut self.cie10_diagnostico2,
            "observaciones2" => &mut self.observaciones2,
            "hallazgoMetabolico" => &mut self.hallazgo_metabolico,
            "hallazgoOsteomuscular" => &mut self.hallazgo_osteomuscular,
            "otrosAntecedentes" => &mut self.otros_antecedentes,
            _ => return false,
        };
        *slot = value.to_string();
        true
    }
}

/// Identity data resolved from the civil registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    /// The ten-digit identity number the lookup was issued for.
    pub cedula: String,
    /// Given names, as returned by the registry.
    pub nombres: String,
    /// Surnames, as returned by the registry.
    pub apellidos: String,
}

/// One fully processed document: identity fields plus the ten schema fields.
///
/// Immutable once produced; one per successfully processed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Original upload filename.
    #[serde(rename = "fileName")]
    pub file_name: String,

    /// Derived identity number, or [`CEDULA_FALLBACK`].
    pub cedula: String,

    /// Given names from the registry, or [`NAME_FALLBACK`].
    pub nombre: String,

    /// Surnames from the registry, or [`NAME_FALLBACK`].
    pub apellido: String,

    /// The ten extraction fields, flattened into the record.
    #[serde(flatten)]
    pub fields: CertificateFields,
}
