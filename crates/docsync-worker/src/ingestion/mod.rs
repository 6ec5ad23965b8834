//! Ingestion stages: filter, fetch, load, split and decorate

mod fetcher;
mod filter;
pub mod metadata;
mod parser;
mod splitter;

pub use fetcher::ContentFetcher;
pub use filter::{file_extension, AllowList};
pub use metadata::{build_chunks, chunk_id, decorate};
pub use parser::{FileParser, LoadedDocument};
pub use splitter::RecursiveSplitter;

#[cfg(all(test, feature = "pdf"))]
pub(crate) use parser::sample_pdf;
