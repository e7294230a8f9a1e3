//! Plain-text extraction for indexed documents.
//!
//! Format is decided by file extension against a closed set. Extraction
//! never panics: a broken document comes back as an error and the
//! indexing walk records the file as skipped.

use std::io::Read;
use std::path::Path;

use crate::error::{IndexError, Result};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// The document formats the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocFormat {
    /// Classify by extension, case-insensitive. Unknown or missing
    /// extensions are unsupported.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocFormat::Pdf),
            "docx" => Ok(DocFormat::Docx),
            "txt" | "md" => Ok(DocFormat::Txt),
            _ => Err(IndexError::UnsupportedFormat(
                path.to_string_lossy().to_string(),
            )),
        }
    }
}

/// Extract UTF-8 text from a file on disk.
pub fn extract_text(path: &Path) -> Result<String> {
    match DocFormat::from_path(path)? {
        DocFormat::Txt => std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e)),
        DocFormat::Pdf => {
            let bytes = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
            extract_pdf(&bytes)
        }
        DocFormat::Docx => {
            let bytes = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
            extract_docx(&bytes)
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| IndexError::Extract(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| IndexError::Extract(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| IndexError::Extract(format!("word/document.xml: {}", e)))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| IndexError::Extract(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(IndexError::Extract(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Collect the text of every `w:t` element, space-separating runs.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(IndexError::Extract(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_is_decided_by_extension() {
        assert_eq!(DocFormat::from_path(Path::new("/a/b.pdf")).unwrap(), DocFormat::Pdf);
        assert_eq!(DocFormat::from_path(Path::new("/a/B.DOCX")).unwrap(), DocFormat::Docx);
        assert_eq!(DocFormat::from_path(Path::new("/a/b.txt")).unwrap(), DocFormat::Txt);
        assert!(DocFormat::from_path(Path::new("/a/b.exe")).is_err());
        assert!(DocFormat::from_path(Path::new("/a/noext")).is_err());
    }

    #[test]
    fn txt_extraction_reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all("plain text here".as_bytes())
            .unwrap();
        assert_eq!(extract_text(&path).unwrap(), "plain text here");
    }

    #[test]
    fn docx_extraction_walks_w_t_elements() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.docx");
        let xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap();

        assert_eq!(extract_text(&path).unwrap(), "Hello world");
    }

    #[test]
    fn corrupt_docx_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.docx");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"not a zip archive")
            .unwrap();
        assert!(matches!(extract_text(&path), Err(IndexError::Extract(_))));
    }
}
