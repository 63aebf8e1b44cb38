//! Output formatting
//!
//! Console lines and summaries ([`text`]), the JSON session report ([`json`]),
//! and a PNG of the final frame ([`image`]).

pub mod image;
pub mod json;
pub mod text;
