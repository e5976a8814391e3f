//! Perspective abstraction.

use std::future::Future;
use std::pin::Pin;

use crate::rescue::core::category::MemoryCategory;
use crate::rescue::core::memory::CandidateMemory;

/// Boxed future type for perspective extraction.
pub type ExtractFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One extraction role: a prompt bound to a category and a model.
///
/// `extract` never fails. Any failure inside the call yields an empty sequence,
/// which keeps one perspective's trouble away from its siblings.
pub trait Perspective: Send + Sync {
    /// Category every candidate of this perspective belongs to.
    fn category(&self) -> MemoryCategory;
    /// Model id recorded as provenance on extracted memories.
    fn model(&self) -> &str;
    /// Extract candidate memories from the context.
    fn extract<'a>(&'a self, context: &'a str) -> ExtractFuture<'a, Vec<CandidateMemory>>;
}
