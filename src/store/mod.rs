//! Study catalog abstraction.
//!
//! Resource handlers read curated study metadata through the [`StudyStore`]
//! trait so the relational backend can be swapped without touching the
//! security layer.
//!
//! # Implementations
//!
//! - [`InMemoryStudyStore`] - studies loaded from a JSON file at startup
//!
//! # Example
//!
//! ```no_run
//! use portal_guard::store::InMemoryStudyStore;
//! use portal_guard::types::CancerStudy;
//!
//! let store = InMemoryStudyStore::new(vec![
//!     CancerStudy::new("study_tcga_pub", "TCGA (published)"),
//! ]);
//! ```

mod memory;

pub use memory::InMemoryStudyStore;

use crate::{Result, types::CancerStudy};
use async_trait::async_trait;

/// Read access to cancer study metadata
#[async_trait]
pub trait StudyStore: Send + Sync {
    /// All studies, ordered by study id
    async fn list_studies(&self) -> Result<Vec<CancerStudy>>;

    /// A single study, `None` if unknown
    async fn get_study(&self, study_id: &str) -> Result<Option<CancerStudy>>;
}
