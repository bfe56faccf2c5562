//! Offer classification and structured extraction.

pub mod extractor;
pub mod json;
pub mod record;
pub mod spam;

pub use extractor::{build_prompt, HttpOfferExtractor, OfferExtractor};
pub use json::recover_json_object;
pub use record::{Customer, Dimension, OfferDetails, OfferRecord, Party, Price, Product};
pub use spam::SpamClassifier;
