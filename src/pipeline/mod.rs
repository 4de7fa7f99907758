//! Pipeline stages for certificate extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a scripted model in tests) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! identity ─┐
//! (filename)│
//!           ▼
//! render ──▶ encode ──▶ extract ──▶ normalize
//! (pdfium)   (base64)   (VLM)       (defensive JSON)
//! ```
//!
//! 1. [`identity`]  — derive the identity number from the filename and
//!    enrich it via the civil registry; best effort, never fatal
//! 2. [`render`]    — rasterise the first pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]    — PNG-encode and base64-wrap each `DynamicImage` for the
//!    multimodal API request body
//! 4. [`extract`]   — drive the vision-model call with retry/backoff
//! 5. [`normalize`] — defensive JSON recovery onto the fixed ten-field schema

pub mod encode;
pub mod extract;
pub mod identity;
pub mod normalize;
pub mod render;
