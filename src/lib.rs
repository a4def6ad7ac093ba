//! Purpose: Frame store library backing the `framestore` CLI and tests.
//! Exports: `core` (handles, stores, text codec, errors), `api`, `notice`.
//! Role: Library crate; `api` is the supported import path for callers.
//! Invariants: Stores own their datums; handles never outlive the store they name.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod notice;
