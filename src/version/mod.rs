//! Image update detection
//!
//! This module finds out whether a newer image is available for a reference,
//! by digest drift or by a higher semver-like tag, and keeps the answers cached.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Registries │────▶│   Checker   │────▶│    Cache    │
//! │ (tags, mfst)│     │  (resolve)  │     │ (dedup, rw) │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Credentials │     │   Semver    │     │    Store    │
//! │  (per host) │     │ (best tag)  │     │  (SQLite)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: in-memory update cache with refresh deduplication
//! - [`checker`]: one full check of an image against its registry
//! - [`credentials`]: per-host registry credential lookup
//! - [`registry`]: registry trait and manifest descriptor types
//! - [`registries`]: Docker Hub and OCI distribution implementations
//! - [`resolver`]: turning tags and digests into a `VersionInfo`
//! - [`semver`]: tag parsing and best-version selection
//! - [`store`]: SQLite snapshot of the cache
//! - [`error`]: error types for the layers above

pub mod cache;
pub mod checker;
pub mod credentials;
pub mod error;
pub mod registries;
pub mod registry;
pub mod resolver;
pub mod semver;
pub mod store;
