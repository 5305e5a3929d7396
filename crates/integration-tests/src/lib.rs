//! Cross-crate pipeline tests for OpenCluster.
//!
//! The scenarios live under `tests/`; this library target is intentionally
//! empty.
