//! PDF attachment handling: content sniffing, document loading and
//! page-by-page rendering to raster image buffers.
//!
//! Rendering goes through pdfium. The library is bound per converter
//! instance; rendering happens off the async runtime (the orchestrator
//! wraps calls in `spawn_blocking`).

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pdfium_render::prelude::*;
use rk_core::{Error, Result};
use tracing::debug;

/// Leading bytes of every PDF file (`%PDF`).
pub const PDF_MAGIC: [u8; 4] = [0x25, 0x50, 0x44, 0x46];

/// Render scale applied to the page viewport. 4.0 keeps scanned text
/// in typical portal attachments legible.
pub const DEFAULT_SCALE: f32 = 4.0;

/// Delivery cost bound: pages past this are silently omitted.
pub const MAX_PAGES: u16 = 10;

/// Content sniff for PDF files. Attachments may lack a `.pdf`
/// extension, so the first four bytes are checked against the magic
/// number instead. Files shorter than four bytes are not PDFs.
pub fn is_pdf(path: &Path) -> Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == PDF_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Raster output format for rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(format!("Unknown image format: {}", other)),
        }
    }
}

/// One rendered page, labeled with its 1-based page number.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_no: u16,
    pub data: Vec<u8>,
}

pub fn capped_page_count(total: u16, max_pages: u16) -> u16 {
    total.min(max_pages)
}

/// 1-based page numbers rendered for a document of `total` pages.
pub fn page_numbers(total: u16, max_pages: u16) -> Vec<u16> {
    (1..=capped_page_count(total, max_pages)).collect()
}

/// Loads PDF documents and renders their pages to image buffers.
pub struct PdfConverter {
    pdfium: Pdfium,
}

impl PdfConverter {
    /// Binds the pdfium library: system-wide install first, then a
    /// copy next to the executable.
    pub fn new() -> Result<Self> {
        let bindings = Pdfium::bind_to_system_library()
            .or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            })
            .map_err(|e| Error::External(anyhow::anyhow!("failed to bind pdfium: {}", e)))?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    /// Parse a PDF file into a page-addressable document.
    pub fn load_document(&self, path: &Path) -> Result<PdfDocument<'_>> {
        self.pdfium
            .load_pdf_from_file(path.to_string_lossy().as_ref(), None)
            .map_err(|e| Error::CorruptDocument(format!("{}: {}", path.display(), e)))
    }

    /// Render one page (1-based) at `scale` to an encoded image buffer.
    pub fn render_page(
        &self,
        document: &PdfDocument,
        page_no: u16,
        format: ImageFormat,
        scale: f32,
    ) -> Result<Vec<u8>> {
        let page = document
            .pages()
            .get(page_no - 1)
            .map_err(|e| Error::CorruptDocument(format!("page {}: {}", page_no, e)))?;

        let width = (page.width().value * scale) as i32;
        let height = (page.height().value * scale) as i32;
        debug!("rendering page {} at {}x{}", page_no, width, height);

        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(width)
                    .set_target_height(height),
            )
            .map_err(|e| Error::CorruptDocument(format!("render page {}: {}", page_no, e)))?;

        encode_rgba(bitmap.as_rgba_bytes(), width as u32, height as u32, format)
    }

    /// Render up to `max_pages` pages of the document at `path`, in
    /// page order, each labeled with its 1-based page number. Pages
    /// past the cap are omitted.
    pub fn render_all_pages_capped(
        &self,
        path: &Path,
        format: ImageFormat,
        max_pages: u16,
    ) -> Result<Vec<RenderedPage>> {
        let document = self.load_document(path)?;
        let total = document.pages().len();
        let pages = capped_page_count(total, max_pages);
        debug!("document has {} pages, rendering {}", total, pages);

        let mut rendered = Vec::with_capacity(pages as usize);
        for page_no in 1..=pages {
            rendered.push(RenderedPage {
                page_no,
                data: self.render_page(&document, page_no, format, DEFAULT_SCALE)?,
            });
        }
        Ok(rendered)
    }

    /// Dump every page of a local PDF to `out_dir` as
    /// `output{n}.{ext}` files. No page cap; this backs the `pdf2img`
    /// CLI subcommand, not delivery.
    pub fn write_all_pages(
        &self,
        path: &Path,
        out_dir: &Path,
        format: ImageFormat,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let document = self.load_document(path)?;
        let total = document.pages().len();

        let mut written = Vec::with_capacity(total as usize);
        for page_no in 1..=total {
            let data = self.render_page(&document, page_no, format, DEFAULT_SCALE)?;
            let file = out_dir.join(format!("output{}.{}", page_no, format.extension()));
            std::fs::write(&file, data)?;
            written.push(file);
        }
        Ok(written)
    }
}

fn encode_rgba(rgba: Vec<u8>, width: u32, height: u32, format: ImageFormat) -> Result<Vec<u8>> {
    let buffer = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| Error::CorruptDocument("bitmap does not match page dimensions".to_string()))?;

    let mut out = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(buffer)
            .to_rgb8()
            .write_to(&mut out, image::ImageOutputFormat::Jpeg(90))
            .map_err(|e| Error::External(anyhow::anyhow!(e)))?,
        ImageFormat::Png => buffer
            .write_to(&mut out, image::ImageOutputFormat::Png)
            .map_err(|e| Error::External(anyhow::anyhow!(e)))?,
    }
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_is_pdf_magic() {
        let file = write_temp(b"%PDF-1.4\n%rest of a pdf");
        assert!(is_pdf(file.path()).unwrap());
    }

    #[test]
    fn test_is_pdf_ignores_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attachment.bin");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        assert!(is_pdf(&path).unwrap());
    }

    #[test]
    fn test_is_pdf_rejects_other_bytes() {
        let file = write_temp(b"PK\x03\x04 not a pdf");
        assert!(!is_pdf(file.path()).unwrap());
    }

    #[test]
    fn test_is_pdf_short_file() {
        assert!(!is_pdf(write_temp(b"%PD").path()).unwrap());
        assert!(!is_pdf(write_temp(b"").path()).unwrap());
    }

    #[test]
    fn test_page_cap() {
        assert_eq!(page_numbers(15, MAX_PAGES), (1..=10).collect::<Vec<u16>>());
        assert_eq!(page_numbers(3, MAX_PAGES), vec![1, 2, 3]);
        assert_eq!(page_numbers(10, MAX_PAGES).len(), 10);
        assert!(page_numbers(0, MAX_PAGES).is_empty());
    }

    #[test]
    fn test_image_format_parse() {
        assert_eq!("jpeg".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("JPG".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("png".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    // Builds a valid empty-page PDF with computed xref offsets.
    fn minimal_pdf(pages: usize) -> Vec<u8> {
        let mut objects = vec![
            "<</Type/Catalog/Pages 2 0 R>>".to_string(),
            format!(
                "<</Type/Pages/Kids[{}]/Count {}>>",
                (0..pages)
                    .map(|i| format!("{} 0 R", i + 3))
                    .collect::<Vec<_>>()
                    .join(" "),
                pages
            ),
        ];
        for _ in 0..pages {
            objects.push("<</Type/Page/Parent 2 0 R/MediaBox[0 0 612 792]>>".to_string());
        }

        let mut body = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, obj) in objects.iter().enumerate() {
            offsets.push(body.len());
            body.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, obj).as_bytes());
        }
        let xref_at = body.len();
        body.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        body.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            body.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        body.extend_from_slice(
            format!(
                "trailer\n<</Size {}/Root 1 0 R>>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        body
    }

    #[test]
    #[ignore = "requires a pdfium library on the system"]
    fn test_render_all_pages_capped_real() {
        let file = write_temp(&minimal_pdf(15));
        let converter = PdfConverter::new().unwrap();
        let rendered = converter
            .render_all_pages_capped(file.path(), ImageFormat::Jpeg, MAX_PAGES)
            .unwrap();
        assert_eq!(rendered.len(), 10);
        assert_eq!(rendered[0].page_no, 1);
        assert_eq!(rendered[9].page_no, 10);
        // JPEG SOI marker
        assert_eq!(&rendered[0].data[..2], &[0xff, 0xd8]);
    }

    #[test]
    #[ignore = "requires a pdfium library on the system"]
    fn test_corrupt_document() {
        let file = write_temp(b"%PDF-1.4 truncated garbage");
        let converter = PdfConverter::new().unwrap();
        let result = converter.load_document(file.path());
        assert!(matches!(result, Err(Error::CorruptDocument(_))));
    }
}
