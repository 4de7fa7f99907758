//! Integration tests for the batch orchestrator, using scripted fakes for
//! every collaborator (vision model, rasterizer, registry) so they run
//! offline and deterministically. Live-dependency tests live in `e2e.rs`.

use async_trait::async_trait;
use edgequake_llm::{CompletionOptions, ImageData};
use image::{DynamicImage, Rgba, RgbaImage};
use medcert_extract::{
    BatchSummary, DocumentJob, ExtractionConfig, IdentityInfo, IdentityLookup, IdentityRegistry,
    MedcertError, PageRasterizer, VisionModel, CEDULA_FALLBACK, NAME_FALLBACK, SENTINEL,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

const APTO_JSON: &str = r#"{"aptitudMedica":"APTO","diagnostico1":"Hipermetropía","cie10_diagnostico1":"H521"}"#;

/// Vision model that always returns the same text.
struct FixedModel(String);

#[async_trait]
impl VisionModel for FixedModel {
    async fn complete(
        &self,
        _instruction: &str,
        _pages: Vec<ImageData>,
        _options: &CompletionOptions,
    ) -> Result<String, MedcertError> {
        Ok(self.0.clone())
    }
}

/// Vision model that pops one scripted outcome per call.
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn complete(
        &self,
        _instruction: &str,
        _pages: Vec<ImageData>,
        _options: &CompletionOptions,
    ) -> Result<String, MedcertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(detail)) => Err(MedcertError::Extraction { detail }),
            None => panic!("scripted model ran out of responses"),
        }
    }
}

/// Rasterizer that treats every byte after a `%PDF` magic as one page and
/// rejects anything else as undecodable.
struct FakeRasterizer {
    calls: AtomicUsize,
}

impl FakeRasterizer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

fn blank_page() -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])))
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        pdf_bytes: &[u8],
        _dpi: u32,
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, MedcertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if pdf_bytes.is_empty() {
            return Err(MedcertError::EmptyFile);
        }
        if !pdf_bytes.starts_with(b"%PDF") {
            return Err(MedcertError::Conversion {
                detail: "cabecera no reconocida".into(),
            });
        }
        // Stagger completion so concurrent tests exercise out-of-order finishes.
        tokio::time::sleep(Duration::from_millis((pdf_bytes.len() % 7) as u64)).await;
        let page_count = pdf_bytes.len().saturating_sub(4).max(1).min(max_pages);
        Ok((0..page_count).map(|_| blank_page()).collect())
    }
}

/// Registry answering from a fixed map; unknown numbers are `NotFound`.
struct ScriptedRegistry {
    outcomes: HashMap<String, IdentityLookup>,
    calls: AtomicUsize,
}

impl ScriptedRegistry {
    fn new(outcomes: HashMap<String, IdentityLookup>) -> Self {
        Self {
            outcomes,
            calls: AtomicUsize::new(0),
        }
    }

    fn empty() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl IdentityRegistry for ScriptedRegistry {
    async fn lookup(&self, number: &str) -> IdentityLookup {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .get(number)
            .cloned()
            .unwrap_or(IdentityLookup::NotFound)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn valid_pdf(pages: usize) -> Vec<u8> {
    let mut bytes = b"%PDF".to_vec();
    bytes.extend(std::iter::repeat_n(0u8, pages));
    bytes
}

fn base_config(model: Arc<dyn VisionModel>, rasterizer: Arc<dyn PageRasterizer>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .vision_model(model)
        .rasterizer(rasterizer)
        .registry(Arc::new(ScriptedRegistry::empty()))
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

// ── Failure isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_middle_job_does_not_abort_the_batch() {
    let config = base_config(
        Arc::new(FixedModel(APTO_JSON.into())),
        Arc::new(FakeRasterizer::new()),
    );
    let jobs = vec![
        DocumentJob::new("uno.pdf", valid_pdf(2)),
        DocumentJob::new("dos.pdf", b"garbage bytes".to_vec()),
        DocumentJob::new("tres.pdf", valid_pdf(3)),
    ];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(summary.success);
    assert_eq!(summary.procesados, 2);
    assert_eq!(summary.errores, 1);

    let names: Vec<&str> = summary.data.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(names, ["uno.pdf", "tres.pdf"], "input order among successes");

    let failures = summary.errores_detalle.expect("one failure entry");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].archivo, "dos.pdf");
    assert!(failures[0].error.contains("No se pudo convertir"));
}

#[tokio::test]
async fn all_jobs_failing_yields_unsuccessful_summary() {
    let config = base_config(
        Arc::new(FixedModel(APTO_JSON.into())),
        Arc::new(FakeRasterizer::new()),
    );
    let jobs = vec![
        DocumentJob::new("a.pdf", b"nope".to_vec()),
        DocumentJob::new("b.pdf", b"nope".to_vec()),
        DocumentJob::new("c.pdf", b"nope".to_vec()),
    ];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(!summary.success);
    assert!(summary.data.is_empty());
    assert_eq!(summary.procesados, 0);
    assert_eq!(summary.errores, 3);
}

#[tokio::test]
async fn empty_upload_fails_before_the_rasterizer_runs() {
    let rasterizer = Arc::new(FakeRasterizer::new());
    let config = base_config(
        Arc::new(FixedModel(APTO_JSON.into())),
        Arc::clone(&rasterizer) as Arc<dyn PageRasterizer>,
    );
    let jobs = vec![DocumentJob::new("vacio.pdf", Vec::new())];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert_eq!(summary.errores, 1);
    assert_eq!(
        summary.errores_detalle.unwrap()[0].error,
        "Archivo vacío"
    );
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_failure_is_fatal_for_the_job() {
    let model = Arc::new(ScriptedModel::new(vec![Err("HTTP 401".into())]));
    let config = ExtractionConfig::builder()
        .vision_model(Arc::clone(&model) as Arc<dyn VisionModel>)
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::empty()))
        .max_retries(0)
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("cert.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(!summary.success);
    let failures = summary.errores_detalle.unwrap();
    assert!(failures[0].error.contains("HTTP 401"));
}

#[tokio::test]
async fn transient_model_failure_is_retried() {
    let model = Arc::new(ScriptedModel::new(vec![
        Err("HTTP 429".into()),
        Ok(APTO_JSON.into()),
    ]));
    let config = ExtractionConfig::builder()
        .vision_model(Arc::clone(&model) as Arc<dyn VisionModel>)
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::empty()))
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("cert.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(summary.success);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.data[0].fields.aptitud_medica, "APTO");
}

// ── Normalization through the pipeline ───────────────────────────────────────

#[tokio::test]
async fn fenced_model_output_still_produces_a_record() {
    let fenced = format!("```json\n{APTO_JSON}\n```");
    let config = base_config(
        Arc::new(FixedModel(fenced)),
        Arc::new(FakeRasterizer::new()),
    );
    let jobs = vec![DocumentJob::new("cert.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    let record = &summary.data[0];
    assert_eq!(record.fields.aptitud_medica, "APTO");
    assert_eq!(record.fields.cie10_diagnostico1, "H521");
    assert_eq!(record.fields.otros_antecedentes, SENTINEL);
}

#[tokio::test]
async fn garbage_model_output_yields_all_sentinel_record() {
    let config = base_config(
        Arc::new(FixedModel("lo siento, no puedo leer el documento".into())),
        Arc::new(FakeRasterizer::new()),
    );
    let jobs = vec![DocumentJob::new("cert.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(summary.success, "schema parse failure is recoverable");
    let record = &summary.data[0];
    assert_eq!(record.fields.aptitud_medica, SENTINEL);
    assert_eq!(record.fields.diagnostico1, SENTINEL);
}

// ── Identity enrichment ──────────────────────────────────────────────────────

#[tokio::test]
async fn resolved_identity_fills_the_name_fields() {
    let mut outcomes = HashMap::new();
    outcomes.insert(
        "0912345678".to_string(),
        IdentityLookup::Resolved(IdentityInfo {
            cedula: "0912345678".into(),
            nombres: "JUAN CARLOS".into(),
            apellidos: "PEREZ LOPEZ".into(),
        }),
    );
    let config = ExtractionConfig::builder()
        .vision_model(Arc::new(FixedModel(APTO_JSON.into())))
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::new(outcomes)))
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("0912345678_perez.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    let record = &summary.data[0];
    assert_eq!(record.cedula, "0912345678");
    assert_eq!(record.nombre, "JUAN CARLOS");
    assert_eq!(record.apellido, "PEREZ LOPEZ");
}

#[tokio::test]
async fn filename_without_digits_skips_the_lookup() {
    let registry = Arc::new(ScriptedRegistry::empty());
    let config = ExtractionConfig::builder()
        .vision_model(Arc::new(FixedModel(APTO_JSON.into())))
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::clone(&registry) as Arc<dyn IdentityRegistry>)
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("certificado_perez.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    let record = &summary.data[0];
    assert_eq!(record.cedula, CEDULA_FALLBACK);
    assert_eq!(record.nombre, NAME_FALLBACK);
    assert_eq!(record.apellido, NAME_FALLBACK);
    assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unavailable_registry_never_fails_the_job() {
    let mut outcomes = HashMap::new();
    outcomes.insert(
        "0912345678".to_string(),
        IdentityLookup::Unavailable("timeout".into()),
    );
    let config = ExtractionConfig::builder()
        .vision_model(Arc::new(FixedModel(APTO_JSON.into())))
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::new(outcomes)))
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("0912345678.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(summary.success);
    assert_eq!(summary.errores, 0);
    let record = &summary.data[0];
    assert_eq!(record.cedula, "0912345678", "derived number is kept");
    assert_eq!(record.nombre, NAME_FALLBACK);
}

#[tokio::test]
async fn disabled_registry_is_never_consulted() {
    let registry = Arc::new(ScriptedRegistry::empty());
    let config = ExtractionConfig::builder()
        .vision_model(Arc::new(FixedModel(APTO_JSON.into())))
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::clone(&registry) as Arc<dyn IdentityRegistry>)
        .registry_enabled(false)
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("0912345678.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(summary.success);
    assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.data[0].nombre, NAME_FALLBACK);
}

// ── Concurrency, deadline, guard ─────────────────────────────────────────────

#[tokio::test]
async fn concurrent_batch_preserves_input_order() {
    let config = ExtractionConfig::builder()
        .vision_model(Arc::new(FixedModel(APTO_JSON.into())))
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::empty()))
        .concurrency(4)
        .build()
        .unwrap();
    // Decreasing sizes: later jobs rasterise faster and finish first.
    let jobs = vec![
        DocumentJob::new("primero.pdf", valid_pdf(6)),
        DocumentJob::new("segundo.pdf", valid_pdf(4)),
        DocumentJob::new("tercero.pdf", valid_pdf(2)),
        DocumentJob::new("cuarto.pdf", valid_pdf(1)),
    ];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert_eq!(summary.procesados, 4);
    let names: Vec<&str> = summary.data.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(names, ["primero.pdf", "segundo.pdf", "tercero.pdf", "cuarto.pdf"]);
}

#[tokio::test]
async fn expired_deadline_fails_remaining_jobs_but_returns_a_summary() {
    let config = ExtractionConfig::builder()
        .vision_model(Arc::new(FixedModel(APTO_JSON.into())))
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::empty()))
        .batch_deadline(Duration::ZERO)
        .build()
        .unwrap();
    let jobs = vec![
        DocumentJob::new("a.pdf", valid_pdf(1)),
        DocumentJob::new("b.pdf", valid_pdf(1)),
    ];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(!summary.success);
    assert_eq!(summary.errores, 2);
    for failure in summary.errores_detalle.unwrap() {
        assert_eq!(failure.error, "Tiempo de espera del lote agotado");
    }
}

#[tokio::test]
async fn unresolvable_provider_produces_the_guard_shape() {
    // No injected model and a provider name the factory does not know.
    let config = ExtractionConfig::builder()
        .provider_name("definitely-not-a-provider")
        .rasterizer(Arc::new(FakeRasterizer::new()))
        .registry(Arc::new(ScriptedRegistry::empty()))
        .build()
        .unwrap();
    let jobs = vec![DocumentJob::new("cert.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;

    assert!(!summary.success);
    assert_eq!(summary.procesados, 0);
    assert_eq!(summary.errores, 1);
    assert!(summary.data.is_empty());
    let value = serde_json::to_value(&summary).unwrap();
    assert!(
        value.as_object().unwrap().get("errores_detalle").is_none(),
        "the guard shape omits errores_detalle entirely"
    );
    let mensaje = summary.mensaje.expect("guard carries a mensaje");
    assert!(mensaje.starts_with("Error del servidor: "), "got: {mensaje}");
}

// ── Wire shape ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn summary_serialization_matches_the_consumed_shape() {
    let config = base_config(
        Arc::new(FixedModel(APTO_JSON.into())),
        Arc::new(FakeRasterizer::new()),
    );
    let jobs = vec![DocumentJob::new("0912345678_cert.pdf", valid_pdf(1))];

    let summary = medcert_extract::process_batch(jobs, &config).await;
    let value = serde_json::to_value(&summary).unwrap();

    assert_eq!(value["success"], true);
    assert_eq!(value["procesados"], 1);
    assert_eq!(value["errores"], 0);
    assert!(value["errores_detalle"].is_null());
    assert!(value.as_object().unwrap().get("mensaje").is_none());

    let record = &value["data"][0];
    assert_eq!(record["fileName"], "0912345678_cert.pdf");
    assert_eq!(record["cedula"], "0912345678");
    assert_eq!(record["aptitudMedica"], "APTO");
    assert_eq!(record["otrosAntecedentes"], SENTINEL);

    // Round-trips through the wire shape.
    let back: BatchSummary = serde_json::from_value(value).unwrap();
    assert_eq!(back.procesados, 1);
}
