//! Workspace root package; the protocol lives in `crates/`.
//!
//! This package exists to anchor workspace-wide tooling (git hooks via
//! `cargo-husky`). See `shufflewire-proto` for the wire codec and
//! `shufflewire-core` for flow control and dispatch.
