
//! Utilities module - Common text normalization shared by the cache tiers

pub mod text_utils;

// Re-export commonly used utilities
pub use text_utils::TextUtils;
