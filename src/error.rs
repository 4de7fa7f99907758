//! Error types for the medcert-extract library.
//!
//! Only two failure classes are fatal to a document job: a PDF that cannot be
//! rasterised and a vision-model call that fails outright. Everything else
//! degrades in place — a failed registry lookup falls back to the "Sin datos"
//! name fields, and unparseable model output falls back to the all-sentinel
//! record. Per-job failures inside a batch are carried as data
//! ([`crate::batch::BatchFailure`]), never propagated as `Err`, so one bad
//! document cannot abort the batch.
//!
//! Display strings for the job-fatal variants are Spanish: they end up
//! verbatim in the `errores_detalle` list consumed by the frontend.

use thiserror::Error;

/// All fatal errors produced by the medcert-extract library.
#[derive(Debug, Error)]
pub enum MedcertError {
    // ── Conversion errors (fatal to the owning job) ───────────────────────
    /// The uploaded byte buffer was empty; rejected before touching pdfium.
    #[error("Archivo vacío")]
    EmptyFile,

    /// The byte buffer is not a decodable PDF, or rendering failed.
    #[error("No se pudo convertir el PDF a imágenes: {detail}")]
    Conversion { detail: String },

    // ── Extraction errors (fatal to the owning job) ───────────────────────
    /// The vision-model call failed (auth, network, rate limit) after retries.
    #[error("Error al analizar con el modelo de visión: {detail}")]
    Extraction { detail: String },

    /// The vision-model call exceeded the configured timeout.
    #[error("La llamada al modelo excedió {secs}s")]
    ApiTimeout { secs: u64 },

    // ── Batch errors ──────────────────────────────────────────────────────
    /// The whole-batch deadline elapsed before this job started.
    #[error("Tiempo de espera del lote agotado")]
    DeadlineExceeded,

    // ── Config errors (surface before any job is attempted) ───────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MedcertError {
    /// True when this error is fatal to a single job but not to the batch.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyFile
                | Self::Conversion { .. }
                | Self::Extraction { .. }
                | Self::ApiTimeout { .. }
                | Self::DeadlineExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_display() {
        assert_eq!(MedcertError::EmptyFile.to_string(), "Archivo vacío");
    }

    #[test]
    fn conversion_display_carries_detail() {
        let e = MedcertError::Conversion {
            detail: "cabecera corrupta".into(),
        };
        assert!(e.to_string().contains("cabecera corrupta"));
        assert!(e.to_string().starts_with("No se pudo convertir"));
    }

    #[test]
    fn api_timeout_display() {
        let e = MedcertError::ApiTimeout { secs: 120 };
        assert!(e.to_string().contains("120s"));
    }

    #[test]
    fn provider_not_configured_display() {
        let e = MedcertError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: "set OPENAI_API_KEY".into(),
        };
        assert!(e.to_string().contains("openai"));
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn job_fatal_classification() {
        assert!(MedcertError::EmptyFile.is_job_fatal());
        assert!(MedcertError::DeadlineExceeded.is_job_fatal());
        assert!(!MedcertError::InvalidConfig("x".into()).is_job_fatal());
    }
}
