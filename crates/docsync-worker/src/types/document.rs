//! File type detection and the chunk records written to the vector index

use serde::{Deserialize, Serialize};

use super::job::Metadata;

/// File types the loader dispatcher knows about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    Docx,
    /// HTML document (ingested as raw markup)
    Html,
    /// Markdown file
    Markdown,
    /// Plain text file
    Txt,
    /// Anything without a loader
    Unknown,
}

impl FileType {
    /// Detect file type from an extension as computed by
    /// [`crate::ingestion::file_extension`] (leading dot, any case)
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "html" => Self::Html,
            "md" => Self::Markdown,
            "txt" => Self::Txt,
            _ => Self::Unknown,
        }
    }
}

/// One chunk of a source file, ready for the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from file id and chunk position
    pub id: String,
    /// Chunk text
    pub content: String,
    /// Caller metadata plus provenance fields
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(FileType::from_extension(".pdf"), FileType::Pdf);
        assert_eq!(FileType::from_extension(".PDF"), FileType::Pdf);
        assert_eq!(FileType::from_extension("docx"), FileType::Docx);
        assert_eq!(FileType::from_extension(".md"), FileType::Markdown);
        assert_eq!(FileType::from_extension(".htm"), FileType::Unknown);
        assert_eq!(FileType::from_extension(".exe"), FileType::Unknown);
        assert_eq!(FileType::from_extension(""), FileType::Unknown);
    }
}
