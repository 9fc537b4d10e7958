//! Shared helpers.
//!
//! - **URL validation**: feed URLs must point at public http(s) hosts

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
