//! Sentence assembly for speech synthesis: [`ChunkSplitter`] turns token
//! fragments into whole sentences, [`TextNormalizer`] cleans each sentence
//! and extracts its emotion tag.

mod chunker;
mod normalizer;

pub use chunker::ChunkSplitter;
pub use normalizer::{NormalizedChunk, TextNormalizer};
