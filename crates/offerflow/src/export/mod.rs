//! Persisting structured offers outside the working directory.

pub mod sheets;

use async_trait::async_trait;

use crate::error::ExportError;
use crate::offer::OfferRecord;

pub use sheets::{offer_to_rows, sanitize_sheet_title, SheetsExporter};

/// Where an exported offer ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    pub sheet_title: String,
    pub sheet_id: i64,
    pub updated_cells: u64,
}

#[async_trait]
pub trait OfferExporter: Send + Sync {
    async fn export(&self, offer: &OfferRecord) -> Result<ExportReceipt, ExportError>;
}
