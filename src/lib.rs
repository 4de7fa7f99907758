//! # medcert-extract
//!
//! Extract structured records from scanned occupational medical-certificate
//! PDFs using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Occupational certificates arrive as low-quality scans with a mix of
//! printed sections, stamps, and handwriting — classic OCR produces garbage.
//! Instead this crate rasterises the leading pages into PNGs and lets a VLM
//! read them as a clinician would, extracting a fixed ten-field record
//! (fitness verdict, diagnoses, ICD-10 codes, findings) that is safe to store
//! or review downstream. A best-effort civil-registry lookup enriches each
//! record with the person's names, keyed by the ten-digit cédula embedded in
//! the upload filename.
//!
//! ## Pipeline Overview
//!
//! ```text
//! batch of PDFs
//!  │  (per document, failures isolated)
//!  ├─ 1. Identity   cédula from filename + registry lookup (best effort)
//!  ├─ 2. Render     rasterise first 5 pages via pdfium (spawn_blocking)
//!  ├─ 3. Encode     PNG → base64 ImageData
//!  ├─ 4. Extract    one multimodal call: prompt + ordered page images
//!  ├─ 5. Normalize  defensive JSON recovery onto the ten-field schema
//!  └─ 6. Summary    {success, procesados, errores, data, errores_detalle}
//! ```
//!
//! One bad document never aborts the batch: rasterisation and model failures
//! become entries in the summary's failure list, and everything softer
//! (registry down, malformed model output) degrades in place.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medcert_extract::{process_batch, DocumentJob, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let jobs = vec![DocumentJob::new(
//!         "0912345678_perez.pdf",
//!         std::fs::read("0912345678_perez.pdf")?,
//!     )];
//!     let summary = process_batch(jobs, &config).await;
//!     println!("{}", serde_json::to_string_pretty(&summary)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `medcert` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! medcert-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{process_batch, BatchFailure, BatchSummary, DocumentJob};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::MedcertError;
pub use pipeline::extract::{ProviderModel, VisionModel};
pub use pipeline::identity::{derive_identity_number, CivilRegistry, IdentityLookup, IdentityRegistry};
pub use pipeline::normalize::{normalize, strip_code_fences};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use schema::{
    CertificateFields, CertificateRecord, IdentityInfo, CEDULA_FALLBACK, NAME_FALLBACK, SENTINEL,
};
