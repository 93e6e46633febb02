use anyhow::{anyhow, Result};

/// Plain-text extraction from document bytes. Consumed by the fallback
/// scorer; the remote model reads the raw bytes itself.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8], mime_type: &str) -> Result<String>;
}

pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, bytes: &[u8], mime_type: &str) -> Result<String> {
        match mime_type {
            "application/pdf" => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| anyhow!("PDF text extraction failed: {e}")),
            // Word documents and anything else text-like: best-effort lossy decode.
            _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let extractor = PdfTextExtractor;
        let text = extractor
            .extract_text(b"javascript react node", "text/plain")
            .unwrap();
        assert_eq!(text, "javascript react node");
    }

    #[test]
    fn test_invalid_pdf_reports_error() {
        let extractor = PdfTextExtractor;
        assert!(extractor
            .extract_text(b"not a pdf at all", "application/pdf")
            .is_err());
    }
}
