//! `omnia-packs` — prompt-pack eval-definition loader for the Omnia eval
//! worker.
//!
//! A prompt pack is a versioned JSON document holding explicit eval
//! definitions plus simplified `pack_assertions`. The loader fetches the
//! document through a [`PackSource`], converts assertions into
//! `arena_assertion` evals, and caches the result per
//! `(namespace, pack-name)` until invalidated or the requested version
//! changes.

pub mod document;
pub mod loader;
pub mod source;

pub use document::PackDocument;
pub use loader::{filter_evals_by_trigger, PackLoader};
pub use source::{FsPackSource, PackSource};
