//! # Paperscout Sources
//!
//! Source adapters for Paperscout. Each adapter normalizes one external
//! service into `CandidatePaper` records behind the `SourceAdapter` trait.
//!
//! - `arxiv`: Atom API, offset paging
//! - `semantic_scholar`: Graph API search, offset paging
//! - `openalex`: works search, page-numbered paging
//! - `biorxiv`: scraped search results page, single-shot
//! - `web`: SERP-style JSON search, single-shot

pub mod arxiv;
pub mod biorxiv;
pub mod factory;
pub mod http;
pub mod openalex;
pub mod semantic_scholar;
pub mod web;

pub use arxiv::ArxivSource;
pub use biorxiv::BiorxivSource;
pub use factory::{build_source, build_sources};
pub use openalex::OpenAlexSource;
pub use semantic_scholar::SemanticScholarSource;
pub use web::WebSearchSource;
