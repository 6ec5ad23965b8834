//! Loader dispatch: extension to PDF, DOCX or plain-text extraction

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::FileType;

/// Text extracted from one file
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    /// Detected file type
    pub file_type: FileType,
    /// Text segments in document order (one per PDF page, one otherwise)
    pub segments: Vec<String>,
}

impl LoadedDocument {
    /// Total characters across segments
    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.chars().count()).sum()
    }
}

/// Multi-format file parser
pub struct FileParser;

impl FileParser {
    /// Parse file bytes according to the extension (".pdf", ".docx", ...)
    pub fn parse(extension: &str, filename: &str, data: &[u8]) -> Result<LoadedDocument> {
        let file_type = FileType::from_extension(extension);

        let segments = match file_type {
            FileType::Pdf => Self::parse_pdf(filename, data)?,
            FileType::Docx => Self::parse_docx(filename, data)?,
            FileType::Html | FileType::Markdown | FileType::Txt => Self::parse_text(data),
            FileType::Unknown => {
                return Err(Error::UnsupportedFileType(if extension.is_empty() {
                    format!("{} has no extension", filename)
                } else {
                    extension.to_string()
                }))
            }
        };

        Ok(LoadedDocument {
            file_type,
            segments,
        })
    }

    /// Parse on the blocking pool; PDF and DOCX extraction is CPU-bound
    pub async fn parse_blocking(
        extension: String,
        filename: String,
        data: Bytes,
    ) -> Result<LoadedDocument> {
        tokio::task::spawn_blocking(move || Self::parse(&extension, &filename, &data)).await?
    }

    /// Plain text, markdown and HTML are passed through as UTF-8 (lossy)
    fn parse_text(data: &[u8]) -> Vec<String> {
        vec![String::from_utf8_lossy(data).into_owned()]
    }

    /// Parse PDF: one segment per page via lopdf, falling back to
    /// pdf-extract over the whole document
    #[cfg(feature = "pdf")]
    fn parse_pdf(filename: &str, data: &[u8]) -> Result<Vec<String>> {
        let pages = match Self::extract_pdf_pages(data) {
            Ok(pages) if pages.iter().any(|p| !p.trim().is_empty()) => pages,
            Ok(_) => {
                tracing::debug!("lopdf found no text in {}, trying pdf-extract", filename);
                Self::extract_pdf_whole(filename, data)?
            }
            Err(e) => {
                tracing::warn!("lopdf failed on {}: {}, trying pdf-extract", filename, e);
                Self::extract_pdf_whole(filename, data)?
            }
        };

        let pages: Vec<String> = pages.iter().map(|p| clean_pdf_text(p)).collect();
        if pages.iter().all(|p| p.is_empty()) {
            return Err(Error::parse(
                filename,
                "PDF has no extractable text (image-based or encrypted?)",
            ));
        }

        Ok(pages)
    }

    #[cfg(feature = "pdf")]
    fn extract_pdf_pages(data: &[u8]) -> std::result::Result<Vec<String>, lopdf::Error> {
        let doc = lopdf::Document::load_mem(data)?;
        let mut pages = Vec::new();

        for page_number in doc.get_pages().keys() {
            match doc.extract_text(&[*page_number]) {
                Ok(text) => pages.push(text),
                Err(e) => {
                    tracing::debug!("Could not extract text from page {}: {}", page_number, e);
                    pages.push(String::new());
                }
            }
        }

        Ok(pages)
    }

    #[cfg(feature = "pdf")]
    fn extract_pdf_whole(filename: &str, data: &[u8]) -> Result<Vec<String>> {
        let text = pdf_extract::extract_text_from_mem(data)
            .map_err(|e| Error::parse(filename, format!("Failed to load PDF: {}", e)))?;

        // pdf-extract separates pages with form feeds when it can
        Ok(text.split('\u{000C}').map(String::from).collect())
    }

    #[cfg(not(feature = "pdf"))]
    fn parse_pdf(_filename: &str, _data: &[u8]) -> Result<Vec<String>> {
        Err(Error::UnsupportedFileType(
            ".pdf (built without the `pdf` feature)".to_string(),
        ))
    }

    /// Parse DOCX document into a single segment, one line per paragraph.
    /// Table cells contribute one line per cell paragraph, row by row.
    #[cfg(feature = "docx")]
    fn parse_docx(filename: &str, data: &[u8]) -> Result<Vec<String>> {
        let doc = docx_rs::read_docx(data).map_err(|e| Error::parse(filename, e.to_string()))?;

        let mut content = String::new();
        for child in &doc.document.children {
            match child {
                docx_rs::DocumentChild::Paragraph(p) => push_paragraph(&mut content, p),
                docx_rs::DocumentChild::Table(table) => push_table(&mut content, table),
                _ => {}
            }
        }

        let content = content.replace('\0', "");
        if content.trim().is_empty() {
            return Err(Error::parse(filename, "DOCX has no extractable text"));
        }

        Ok(vec![content])
    }

    #[cfg(not(feature = "docx"))]
    fn parse_docx(_filename: &str, _data: &[u8]) -> Result<Vec<String>> {
        Err(Error::UnsupportedFileType(
            ".docx (built without the `docx` feature)".to_string(),
        ))
    }
}

#[cfg(feature = "docx")]
fn push_paragraph(content: &mut String, paragraph: &docx_rs::Paragraph) {
    for child in &paragraph.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for child in &run.children {
                if let docx_rs::RunChild::Text(t) = child {
                    content.push_str(&t.text);
                }
            }
        }
    }
    content.push('\n');
}

#[cfg(feature = "docx")]
fn push_table(content: &mut String, table: &docx_rs::Table) {
    for row in &table.rows {
        let docx_rs::TableChild::TableRow(row) = row;
        for cell in &row.cells {
            let docx_rs::TableRowChild::TableCell(cell) = cell;
            for child in &cell.children {
                match child {
                    docx_rs::TableCellContent::Paragraph(p) => push_paragraph(content, p),
                    docx_rs::TableCellContent::Table(nested) => push_table(content, nested),
                    _ => {}
                }
            }
        }
    }
}

/// Drop NULs, expand ligatures and trim lines of extracted PDF text
#[cfg(feature = "pdf")]
fn clean_pdf_text(text: &str) -> String {
    text.replace('\0', "")
        .replace('\u{00A0}', " ")
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal PDF with one text line per page
#[cfg(all(test, feature = "pdf"))]
pub(crate) fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let kids: Vec<Object> = pages
        .iter()
        .map(|text| {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}
