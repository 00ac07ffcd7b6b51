use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfText,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::PdfText => "pdf_text",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
    Tiff,
}

impl DocumentFormat {
    /// Sniffs the leading magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentFormat::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(DocumentFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentFormat::Jpeg)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(DocumentFormat::Tiff)
        } else {
            None
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, DocumentFormat::Pdf)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
}

pub struct TextExtractor;

impl TextExtractor {
    pub fn extract(path: &Path, ocr_language: &str) -> Result<ExtractedText> {
        let header = read_header(path)?;
        let format = DocumentFormat::detect(&header)
            .ok_or_else(|| anyhow!("Unsupported document format: {}", path.display()))?;

        if format.is_image() {
            let text = Self::extract_via_ocr(path, ocr_language)?;
            return Ok(ExtractedText {
                text,
                method: ExtractionMethod::Ocr,
            });
        }

        match pdf_extract::extract_text(path) {
            Ok(text) if Self::validate_text_quality(&text) => Ok(ExtractedText {
                text,
                method: ExtractionMethod::PdfText,
            }),
            Ok(text) => {
                // scanned PDF: fall back to OCR where available
                match Self::extract_via_ocr(path, ocr_language) {
                    Ok(ocr) => Ok(ExtractedText {
                        text: ocr,
                        method: ExtractionMethod::Ocr,
                    }),
                    Err(err) => {
                        tracing::debug!(path = %path.display(), error = %err, "OCR unavailable, keeping embedded text");
                        Ok(ExtractedText {
                            text,
                            method: ExtractionMethod::PdfText,
                        })
                    }
                }
            }
            Err(err) => Err(anyhow!("PDF text extraction: {}", err)),
        }
    }

    #[cfg(feature = "ocr")]
    fn extract_via_ocr(path: &Path, language: &str) -> Result<String> {
        let text = tesseract::Tesseract::new(None, Some(language))
            .map_err(|e| anyhow!("Tesseract init: {}", e))?
            .set_image(path.to_str().ok_or_else(|| anyhow!("Invalid path"))?)
            .map_err(|e| anyhow!("Tesseract image: {}", e))?
            .recognize()
            .map_err(|e| anyhow!("Tesseract recognize: {}", e))?
            .get_text()
            .map_err(|e| anyhow!("OCR text: {}", e))?;
        Ok(text)
    }

    #[cfg(not(feature = "ocr"))]
    fn extract_via_ocr(_path: &Path, _language: &str) -> Result<String> {
        Err(anyhow!("OCR support is not enabled in this build"))
    }

    pub fn validate_text_quality(text: &str) -> bool {
        text.trim().len() > 50 && text.split_whitespace().count() > 10
    }
}

pub fn read_header(path: &Path) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut header = Vec::with_capacity(8);
    std::fs::File::open(path)?.take(8).read_to_end(&mut header)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_by_magic_bytes() {
        assert_eq!(DocumentFormat::detect(b"%PDF-1.7\n"), Some(DocumentFormat::Pdf));
        assert_eq!(
            DocumentFormat::detect(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some(DocumentFormat::Png)
        );
        assert_eq!(DocumentFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(DocumentFormat::Jpeg));
        assert_eq!(DocumentFormat::detect(b"II*\0rest"), Some(DocumentFormat::Tiff));
        assert_eq!(DocumentFormat::detect(b"PK\x03\x04"), None);
    }

    #[test]
    fn rejects_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"just some text").unwrap();
        assert!(TextExtractor::extract(&path, "deu").is_err());
    }

    #[test]
    fn text_quality_needs_words() {
        assert!(!TextExtractor::validate_text_quality("Rechnung"));
        let text = "Rechnung Nr 2024-001 vom 15.03.2024 Muster GmbH Musterstrasse 1 12345 Musterstadt Betrag 119,00 EUR";
        assert!(TextExtractor::validate_text_quality(text));
    }
}
