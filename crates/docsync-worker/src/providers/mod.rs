//! Provider abstractions for object storage, embeddings, vector storage and
//! file status reporting
//!
//! Each collaborator sits behind a trait so the pipeline can run against the
//! hosted services (Supabase, Ollama, Chroma) or fully in memory.

pub mod chroma;
pub mod embedding;
pub mod file_status;
pub mod object_storage;
pub mod ollama;
pub mod supabase;
pub mod vector_store;

pub use chroma::ChromaVectorStore;
pub use embedding::EmbeddingProvider;
pub use file_status::{FileStatusStore, MemoryFileStatusStore, TracingFileStatusStore};
pub use object_storage::{MemoryObjectStorage, ObjectStorage, SignedUrl};
pub use ollama::OllamaEmbedder;
pub use supabase::SupabaseStorage;
pub use vector_store::{AddDocumentsRequest, AddDocumentsResponse, MemoryVectorStore, VectorStore};
