//! Network side of exports: the generation service client and file retrieval.

mod generator;
mod retrieval;

pub use generator::GeneratorClient;
pub use retrieval::{DownloadRetriever, LinkRetriever, Retriever};
