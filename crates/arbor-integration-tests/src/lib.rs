//! Cross-crate scenario tests for the collaboration core live in `tests/`.
