//! Configuration for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across jobs and to diff two runs to understand
//! why their outputs differ.
//!
//! The three collaborator handles (vision model, identity registry, page
//! rasterizer) live here as explicit dependencies rather than process-wide
//! globals, so tests can substitute scripted fakes without touching the
//! environment.

use crate::error::MedcertError;
use crate::pipeline::extract::VisionModel;
use crate::pipeline::identity::{IdentityRegistry, DEFAULT_REGISTRY_URL};
use crate::pipeline::render::PageRasterizer;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a batch extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use medcert_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .model("gpt-4o")
///     .registry_enabled(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 200.
    ///
    /// Certificates are scans, often of poor quality; 200 DPI keeps small
    /// handwriting and stamped codes legible to the model while the PNG stays
    /// well under typical API upload limits.
    pub dpi: u32,

    /// Maximum pages rasterised per document. Range: 1–16. Default: 5.
    ///
    /// Certificates in the known template family fit in five pages; longer
    /// uploads are truncated silently, keeping the first pages where the
    /// verdict and diagnoses live.
    pub max_pages: usize,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "azure").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed vision model. Takes precedence over `provider_name`.
    pub vision_model: Option<Arc<dyn VisionModel>>,

    /// Pre-constructed identity registry. Takes precedence over `registry_url`.
    pub registry: Option<Arc<dyn IdentityRegistry>>,

    /// Pre-constructed page rasterizer. Defaults to the pdfium-backed one.
    pub rasterizer: Option<Arc<dyn PageRasterizer>>,

    /// Sampling temperature for the model call. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to what is on the page —
    /// exactly what field extraction needs.
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 2500.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Range: 0–5. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Civil-registry lookup timeout in seconds. Default: 10.
    ///
    /// The lookup is best effort; a slow registry must not stall the batch,
    /// so this stays short and there is no retry.
    pub registry_timeout_secs: u64,

    /// Civil-registry endpoint URL.
    pub registry_url: String,

    /// Whether to attempt the identity-enrichment lookup at all. Default: true.
    pub registry_enabled: bool,

    /// Number of jobs processed concurrently. Default: 1 (strictly sequential).
    ///
    /// Jobs are independent, so batches can be parallelised safely; output
    /// order always matches input order regardless of completion order.
    pub concurrency: usize,

    /// Optional deadline for the whole batch. Jobs not yet started when it
    /// elapses are recorded as failures; the summary is still returned.
    pub batch_deadline: Option<Duration>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_pages: 5,
            model: None,
            provider_name: None,
            vision_model: None,
            registry: None,
            rasterizer: None,
            temperature: 0.1,
            max_tokens: 2500,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            registry_timeout_secs: 10,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            registry_enabled: true,
            concurrency: 1,
            batch_deadline: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_pages", &self.max_pages)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("vision_model", &self.vision_model.as_ref().map(|_| "<dyn VisionModel>"))
            .field("registry", &self.registry.as_ref().map(|_| "<dyn IdentityRegistry>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn PageRasterizer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("registry_timeout_secs", &self.registry_timeout_secs)
            .field("registry_url", &self.registry_url)
            .field("registry_enabled", &self.registry_enabled)
            .field("concurrency", &self.concurrency)
            .field("batch_deadline", &self.batch_deadline)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.clamp(1, 16);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision_model = Some(model);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn IdentityRegistry>) -> Self {
        self.config.registry = Some(registry);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(5);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn registry_timeout_secs(mut self, secs: u64) -> Self {
        self.config.registry_timeout_secs = secs.max(1);
        self
    }

    pub fn registry_url(mut self, url: impl Into<String>) -> Self {
        self.config.registry_url = url.into();
        self
    }

    pub fn registry_enabled(mut self, enabled: bool) -> Self {
        self.config.registry_enabled = enabled;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn batch_deadline(mut self, deadline: Duration) -> Self {
        self.config.batch_deadline = Some(deadline);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, MedcertError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(MedcertError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.max_pages == 0 {
            return Err(MedcertError::InvalidConfig(
                "Page cap must be ≥ 1".into(),
            ));
        }
        if c.registry_enabled && c.registry.is_none() && c.registry_url.is_empty() {
            return Err(MedcertError::InvalidConfig(
                "Registry is enabled but no endpoint URL is set".into(),
            ));
        }
        Ok(self.config)
    }
}
