//! PDF rasterisation: render the leading pages of a byte buffer via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why a page cap?
//!
//! Certificates in the known template family fit in five pages. Rendering and
//! uploading every page of an arbitrary scan would blow the model's image
//! budget for no extraction gain, so only the first `max_pages` pages are
//! kept — in physical order, since page order drives the model's reading.

use crate::error::MedcertError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Rasterises a PDF byte buffer into ordered page images.
///
/// The production implementation is [`PdfiumRasterizer`]; tests substitute a
/// scripted fake via [`crate::config::ExtractionConfigBuilder::rasterizer`].
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render the first `max_pages` pages at `dpi`. Index 0 of the returned
    /// vector is always the first physical page.
    async fn rasterize(
        &self,
        pdf_bytes: &[u8],
        dpi: u32,
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, MedcertError>;
}

/// Rasterizer backed by pdfium, binding via `pdfium-auto` on first use.
pub struct PdfiumRasterizer;

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        pdf_bytes: &[u8],
        dpi: u32,
        max_pages: usize,
    ) -> Result<Vec<DynamicImage>, MedcertError> {
        if pdf_bytes.is_empty() {
            return Err(MedcertError::EmptyFile);
        }
        let bytes = pdf_bytes.to_vec();

        tokio::task::spawn_blocking(move || rasterize_blocking(&bytes, dpi, max_pages))
            .await
            .map_err(|e| MedcertError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    pdf_bytes: &[u8],
    dpi: u32,
    max_pages: usize,
) -> Result<Vec<DynamicImage>, MedcertError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| MedcertError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| MedcertError::Conversion {
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let take = total_pages.min(max_pages);
    info!(total_pages, rendered = take, "PDF loaded");
    if take < total_pages {
        debug!(
            skipped = total_pages - take,
            "document exceeds the page cap, trailing pages dropped"
        );
    }

    let mut images = Vec::with_capacity(take);

    for idx in 0..take {
        let page = pages
            .get(idx as u16)
            .map_err(|e| MedcertError::Conversion {
                detail: format!("página {}: {:?}", idx + 1, e),
            })?;

        // pdfium renders to a pixel target, not a DPI value; scale the page's
        // point size (1 pt = 1/72 in) to the requested density.
        let width_px = (page.width().value * dpi as f32 / 72.0).round() as i32;
        let height_px = (page.height().value * dpi as f32 / 72.0).round() as i32;
        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px.max(1))
            .set_maximum_height(height_px.max(1));

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| MedcertError::Conversion {
                detail: format!("página {}: {:?}", idx + 1, e),
            })?;

        let image = bitmap.as_image();
        debug!(
            page = idx + 1,
            width = image.width(),
            height = image.height(),
            "rendered page"
        );

        images.push(image);
    }

    if images.is_empty() {
        return Err(MedcertError::Conversion {
            detail: "No se pudieron extraer imágenes del PDF".into(),
        });
    }

    Ok(images)
}
