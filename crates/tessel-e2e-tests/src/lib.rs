//! End-to-end tests for the Tessel compiler live under `tests/`.
