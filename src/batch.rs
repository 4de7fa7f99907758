//! Batch orchestration: drive the pipeline over a list of uploaded documents.
//!
//! Each job runs the same stage sequence — resolve identity (best effort),
//! rasterise (fatal on failure), extract (fatal on failure), normalize — and
//! any fatal error is caught at the per-job boundary: it becomes a
//! [`BatchFailure`] entry and the batch moves on. The caller always receives
//! a [`BatchSummary`], never a bare error; a narrow top-level guard converts
//! even an internal defect into the zero-processed summary shape.
//!
//! Jobs are independent, so batches may be processed concurrently
//! (`concurrency > 1`); results are re-sorted by input index, so output order
//! always matches input order regardless of completion order.

use crate::config::ExtractionConfig;
use crate::error::MedcertError;
use crate::pipeline::extract::{self, ProviderModel, VisionModel};
use crate::pipeline::identity::{self, CivilRegistry, IdentityLookup, IdentityRegistry};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::{encode, normalize};
use crate::schema::{CertificateRecord, CEDULA_FALLBACK, NAME_FALLBACK};
use edgequake_llm::ProviderFactory;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One uploaded file awaiting extraction.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    /// Original upload filename; also the source of the identity number.
    pub file_name: String,
    /// Raw PDF bytes.
    pub bytes: Vec<u8>,
}

impl DocumentJob {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// A failed job: filename plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub archivo: String,
    pub error: String,
}

/// Aggregated outcome of a batch. Finalized after all jobs complete — never
/// partially emitted.
///
/// `Serialize` is hand-written: an ordinary summary always carries
/// `errores_detalle` (as `null` when no job failed), while the guard shape
/// omits the key entirely and carries `mensaje` instead.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSummary {
    /// True iff at least one job produced a record.
    pub success: bool,
    /// Count of jobs that produced a record.
    pub procesados: usize,
    /// Count of jobs that failed.
    pub errores: usize,
    /// Records for successful jobs, in input order.
    pub data: Vec<CertificateRecord>,
    /// Failure entries, in input order; serialized as `null` when empty.
    pub errores_detalle: Option<Vec<BatchFailure>>,
    /// Present only on the top-level-guard shape.
    pub mensaje: Option<String>,
}

impl Serialize for BatchSummary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let with_detalle = self.mensaje.is_none() || self.errores_detalle.is_some();
        let len = 4 + usize::from(with_detalle) + usize::from(self.mensaje.is_some());
        let mut state = serializer.serialize_struct("BatchSummary", len)?;
        state.serialize_field("success", &self.success)?;
        state.serialize_field("procesados", &self.procesados)?;
        state.serialize_field("errores", &self.errores)?;
        state.serialize_field("data", &self.data)?;
        if with_detalle {
            state.serialize_field("errores_detalle", &self.errores_detalle)?;
        }
        if let Some(ref mensaje) = self.mensaje {
            state.serialize_field("mensaje", mensaje)?;
        }
        state.end()
    }
}

impl BatchSummary {
    /// The guard shape: zero processed, one error, a `mensaje` string.
    fn guard(detail: String) -> Self {
        Self {
            success: false,
            procesados: 0,
            errores: 1,
            data: Vec::new(),
            errores_detalle: None,
            mensaje: Some(format!("Error del servidor: {detail}")),
        }
    }
}

/// Process a batch of uploaded documents into a summary.
///
/// This is the primary entry point for the library. It never returns an
/// error: per-job failures land in `errores_detalle`, and configuration or
/// internal defects produce the guard shape (`procesados: 0, errores: 1`,
/// with a `mensaje`).
pub async fn process_batch(jobs: Vec<DocumentJob>, config: &ExtractionConfig) -> BatchSummary {
    match AssertUnwindSafe(run_batch(jobs, config)).catch_unwind().await {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            error!(error = %e, "batch aborted before processing");
            BatchSummary::guard(e.to_string())
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!(detail, "batch orchestrator panicked");
            BatchSummary::guard(detail)
        }
    }
}

/// Fallible batch body. The only `Err` paths are collaborator resolution
/// failures, which happen before any job is attempted.
async fn run_batch(
    jobs: Vec<DocumentJob>,
    config: &ExtractionConfig,
) -> Result<BatchSummary, MedcertError> {
    let model = resolve_model(config)?;
    let rasterizer = resolve_rasterizer(config);
    let registry = resolve_registry(config);
    let deadline = config.batch_deadline.map(|d| Instant::now() + d);

    info!(
        jobs = jobs.len(),
        concurrency = config.concurrency,
        "processing batch"
    );

    let mut outcomes = if config.concurrency <= 1 {
        run_sequential(jobs, &model, &rasterizer, registry.as_ref(), config, deadline).await
    } else {
        run_concurrent(jobs, &model, &rasterizer, registry.as_ref(), config, deadline).await
    };

    // Completion order is arbitrary in concurrent mode; input order is the
    // contract.
    outcomes.sort_by_key(|(idx, _, _)| *idx);

    let mut data = Vec::new();
    let mut failures = Vec::new();
    for (_, file_name, outcome) in outcomes {
        match outcome {
            Ok(record) => data.push(record),
            Err(e) => {
                warn!(archivo = %file_name, error = %e, "job failed");
                failures.push(BatchFailure {
                    archivo: file_name,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        procesados = data.len(),
        errores = failures.len(),
        "batch complete"
    );

    Ok(BatchSummary {
        success: !data.is_empty(),
        procesados: data.len(),
        errores: failures.len(),
        data,
        errores_detalle: if failures.is_empty() {
            None
        } else {
            Some(failures)
        },
        mensaje: None,
    })
}

type JobOutcome = (usize, String, Result<CertificateRecord, MedcertError>);

/// Default mode: jobs strictly one after another.
async fn run_sequential(
    jobs: Vec<DocumentJob>,
    model: &Arc<dyn VisionModel>,
    rasterizer: &Arc<dyn PageRasterizer>,
    registry: Option<&Arc<dyn IdentityRegistry>>,
    config: &ExtractionConfig,
    deadline: Option<Instant>,
) -> Vec<JobOutcome> {
    let mut outcomes = Vec::with_capacity(jobs.len());
    for (idx, job) in jobs.into_iter().enumerate() {
        let file_name = job.file_name.clone();
        let outcome = if deadline_elapsed(deadline) {
            Err(MedcertError::DeadlineExceeded)
        } else {
            process_job(job, model, rasterizer, registry, config).await
        };
        outcomes.push((idx, file_name, outcome));
    }
    outcomes
}

/// Concurrent mode: up to `concurrency` jobs in flight at once.
async fn run_concurrent(
    jobs: Vec<DocumentJob>,
    model: &Arc<dyn VisionModel>,
    rasterizer: &Arc<dyn PageRasterizer>,
    registry: Option<&Arc<dyn IdentityRegistry>>,
    config: &ExtractionConfig,
    deadline: Option<Instant>,
) -> Vec<JobOutcome> {
    stream::iter(jobs.into_iter().enumerate().map(|(idx, job)| {
        let model = Arc::clone(model);
        let rasterizer = Arc::clone(rasterizer);
        let registry = registry.map(Arc::clone);
        async move {
            let file_name = job.file_name.clone();
            let outcome = if deadline_elapsed(deadline) {
                Err(MedcertError::DeadlineExceeded)
            } else {
                process_job(job, &model, &rasterizer, registry.as_ref(), config).await
            };
            (idx, file_name, outcome)
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await
}

fn deadline_elapsed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Run one document through the full stage sequence.
async fn process_job(
    job: DocumentJob,
    model: &Arc<dyn VisionModel>,
    rasterizer: &Arc<dyn PageRasterizer>,
    registry: Option<&Arc<dyn IdentityRegistry>>,
    config: &ExtractionConfig,
) -> Result<CertificateRecord, MedcertError> {
    debug!(archivo = %job.file_name, bytes = job.bytes.len(), "processing document");

    if job.bytes.is_empty() {
        return Err(MedcertError::EmptyFile);
    }

    // ── Identity (best effort) ───────────────────────────────────────────
    let cedula = identity::derive_identity_number(&job.file_name);
    let (nombre, apellido) = match (&cedula, registry) {
        (Some(number), Some(registry)) => match registry.lookup(number).await {
            IdentityLookup::Resolved(info) => {
                info!(cedula = %number, nombres = %info.nombres, "identity resolved");
                (info.nombres, info.apellidos)
            }
            IdentityLookup::NotFound => {
                debug!(cedula = %number, "identity not found in registry");
                (NAME_FALLBACK.to_string(), NAME_FALLBACK.to_string())
            }
            IdentityLookup::Unavailable(reason) => {
                warn!(cedula = %number, reason, "registry unavailable, continuing without enrichment");
                (NAME_FALLBACK.to_string(), NAME_FALLBACK.to_string())
            }
        },
        (Some(number), None) => {
            debug!(cedula = %number, "registry disabled, skipping enrichment");
            (NAME_FALLBACK.to_string(), NAME_FALLBACK.to_string())
        }
        (None, _) => {
            debug!(archivo = %job.file_name, "no identity number in filename");
            (NAME_FALLBACK.to_string(), NAME_FALLBACK.to_string())
        }
    };

    // ── Rasterise (fatal) ────────────────────────────────────────────────
    let images = rasterizer
        .rasterize(&job.bytes, config.dpi, config.max_pages)
        .await?;

    let pages = images
        .iter()
        .map(encode::encode_page)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MedcertError::Conversion {
            detail: format!("codificación PNG: {e}"),
        })?;

    // ── Extract (fatal) + normalize (recovering) ─────────────────────────
    let raw = extract::extract_fields(model, pages, config).await?;
    let fields = normalize::normalize(&raw);

    Ok(CertificateRecord {
        file_name: job.file_name,
        cedula: cedula.unwrap_or_else(|| CEDULA_FALLBACK.to_string()),
        nombre,
        apellido,
        fields,
    })
}

// ── Collaborator resolution ──────────────────────────────────────────────

/// Resolve the vision model, from most-specific to least-specific.
///
/// 1. **Pre-built model** (`config.vision_model`) — used as-is; this is how
///    tests inject scripted fakes.
/// 2. **Named provider + model** (`config.provider_name`) — reads the
///    corresponding API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`) —
///    honoured before full auto-detection so an explicit model choice wins
///    even when multiple API keys are present.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`), preferring
///    OpenAI when `OPENAI_API_KEY` is set.
fn resolve_model(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, MedcertError> {
    if let Some(ref model) = config.vision_model {
        return Ok(Arc::clone(model));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4o");
        return create_provider_model(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider_model(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4o");
            return create_provider_model("openai", model);
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MedcertError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(ProviderModel::new(provider)))
}

/// Instantiate a named provider with the given model.
fn create_provider_model(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn VisionModel>, MedcertError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MedcertError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderModel::new(provider)))
}

fn resolve_rasterizer(config: &ExtractionConfig) -> Arc<dyn PageRasterizer> {
    config
        .rasterizer
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumRasterizer))
}

fn resolve_registry(config: &ExtractionConfig) -> Option<Arc<dyn IdentityRegistry>> {
    if !config.registry_enabled {
        return None;
    }
    if let Some(ref registry) = config.registry {
        return Some(Arc::clone(registry));
    }
    Some(Arc::new(CivilRegistry::new(
        config.registry_url.clone(),
        Duration::from_secs(config.registry_timeout_secs),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_null_errores_detalle() {
        let summary = BatchSummary {
            success: true,
            procesados: 1,
            errores: 0,
            data: Vec::new(),
            errores_detalle: None,
            mensaje: None,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value["errores_detalle"].is_null());
        // mensaje is absent, not null, on ordinary summaries
        assert!(value.as_object().unwrap().get("mensaje").is_none());
    }

    #[test]
    fn guard_shape() {
        let summary = BatchSummary::guard("boom".into());
        assert!(!summary.success);
        assert_eq!(summary.procesados, 0);
        assert_eq!(summary.errores, 1);
        assert!(summary.data.is_empty());
        assert_eq!(summary.mensaje.as_deref(), Some("Error del servidor: boom"));
    }

    #[test]
    fn guard_serializes_without_errores_detalle() {
        let summary = BatchSummary::guard("boom".into());
        let value = serde_json::to_value(&summary).unwrap();
        let map = value.as_object().unwrap();
        // The guard shape carries mensaje and drops the key entirely; only
        // ordinary summaries serialize errores_detalle (as null when empty).
        assert!(map.get("errores_detalle").is_none());
        assert_eq!(map["mensaje"], "Error del servidor: boom");
        // Round-trips: a missing key deserializes to None.
        let back: BatchSummary = serde_json::from_value(value).unwrap();
        assert!(back.errores_detalle.is_none());
        assert_eq!(back.mensaje.as_deref(), Some("Error del servidor: boom"));
    }
}
