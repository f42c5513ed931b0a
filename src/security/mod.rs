//! Abuse screening: honeypot paths and User-Agent signatures.
//!
//! [`AbuseFilter`] is a pure function of path and headers. The request
//! classifier runs it right after the diagnostic paths are ruled out, so a
//! match costs no upstream work at all.

mod filter;

pub use filter::{AbuseFilter, DEFAULT_BOT_SIGNATURES, DEFAULT_HONEYPOT_PATHS, Verdict};
