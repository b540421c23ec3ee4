pub mod embedder;
pub mod index;
