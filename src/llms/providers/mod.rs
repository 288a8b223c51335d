//! Provider implementations of [`GenerativeModel`](crate::llms::GenerativeModel).
//!
//! | Provider | Module |
//! |----------|--------|
//! | Google Gemini | [`gemini`] |

pub mod gemini;
