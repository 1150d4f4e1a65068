pub mod http;
pub mod parse;

#[cfg(feature = "browser")]
pub mod browser;

#[cfg(feature = "browser")]
pub use browser::{BrowserExtractor, BrowserExtractorFactory};
pub use http::{HttpExtractor, HttpExtractorFactory};
pub use parse::{parse_count, parse_metrics};
