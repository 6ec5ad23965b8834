//! Allow-list filtering of batch items by MIME type and file extension

use crate::config::FilterConfig;
use crate::types::IngestionItem;

/// Extension of a file name, leading dot included, as written.
///
/// Only the last path component is considered. A name whose only dot is its
/// first character (".env") or that has no dot at all has no extension.
pub fn file_extension(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &base[pos..],
    }
}

/// MIME type and extension allow-lists
#[derive(Debug, Clone)]
pub struct AllowList {
    mime_types: Vec<String>,
    extensions: Vec<String>,
}

impl AllowList {
    /// Build from lists of accepted MIME types and extensions.
    ///
    /// Entries are matched case-insensitively; an extension given without its
    /// leading dot ("pdf") is accepted as ".pdf".
    pub fn new<M, E>(mime_types: M, extensions: E) -> Self
    where
        M: IntoIterator,
        M::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let mime_types = mime_types
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
            .collect();

        Self {
            mime_types,
            extensions,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(&config.allowed_mime_types, &config.allowed_extensions)
    }

    /// Lowercased extension of an eligible item, `None` otherwise
    pub fn eligible_extension(&self, item: &IngestionItem) -> Option<String> {
        let extension = file_extension(&item.original_file_name).to_lowercase();
        if extension.is_empty() {
            return None;
        }

        let content_type = item.content_type.trim().to_lowercase();
        let mime_ok = self.mime_types.iter().any(|m| *m == content_type);
        let ext_ok = self.extensions.iter().any(|e| *e == extension);

        (mime_ok && ext_ok).then_some(extension)
    }

    /// Whether the item passes both allow-lists
    pub fn is_eligible(&self, item: &IngestionItem) -> bool {
        self.eligible_extension(item).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use proptest::prelude::*;

    fn item(name: &str, content_type: &str) -> IngestionItem {
        IngestionItem {
            file_id: format!("id-{}", name),
            task_id: String::new(),
            bucket_name: String::new(),
            resource_path: format!("uploads/{}", name),
            content_type: content_type.to_string(),
            original_file_name: name.to_string(),
            metadata: Metadata::new(),
        }
    }

    fn allow() -> AllowList {
        AllowList::new(
            ["application/pdf", "text/plain"],
            [".pdf", "txt"],
        )
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("report.PDF"), ".PDF");
        assert_eq!(file_extension("archive.tar.gz"), ".gz");
        assert_eq!(file_extension(".env"), "");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension("dir.d/README"), "");
        assert_eq!(file_extension("notes."), ".");
    }

    #[test]
    fn test_mixed_batch() {
        let items = vec![
            item("setup.exe", "application/octet-stream"),
            item("report.PDF", "application/pdf"),
            item("notes.txt", "text/plain"),
            item("fake.pdf", "text/html"),
            item(".env", "text/plain"),
        ];

        let exts: Vec<Option<String>> = items.iter().map(|i| allow().eligible_extension(i)).collect();
        assert_eq!(
            exts,
            vec![None, Some(".pdf".to_string()), Some(".txt".to_string()), None, None]
        );
    }

    #[test]
    fn test_exe_never_eligible() {
        let exe = item("setup.exe", "application/pdf");
        assert!(!allow().is_eligible(&exe));
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let none = AllowList::new(Vec::<String>::new(), Vec::<String>::new());
        assert!(!none.is_eligible(&item("a.pdf", "application/pdf")));
    }

    proptest! {
        #[test]
        fn eligible_iff_both_lists_match(
            stem in "[a-z]{1,8}",
            ext in prop::sample::select(vec!["pdf", "txt", "exe", "PDF", "md"]),
            mime in prop::sample::select(vec!["application/pdf", "text/plain", "image/png"]),
        ) {
            let name = format!("{}.{}", stem, ext);
            let candidate = item(&name, mime);
            let expected = ["pdf", "txt"].contains(&ext.to_lowercase().as_str())
                && ["application/pdf", "text/plain"].contains(&mime);

            prop_assert_eq!(allow().is_eligible(&candidate), expected);
            if expected {
                let lowered = format!(".{}", ext.to_lowercase());
                prop_assert_eq!(allow().eligible_extension(&candidate), Some(lowered));
            }
        }
    }
}
