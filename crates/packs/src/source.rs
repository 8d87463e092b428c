//! Where pack documents come from.
//!
//! Production deployments mount packs as directories of
//! `<namespace>/<pack>/pack.json`; tests plug in an in-memory source.

use std::path::PathBuf;

use async_trait::async_trait;
use omnia_domain::error::{Error, Result};

/// Fetches the raw `pack.json` document for a `(namespace, pack)` pair.
#[async_trait]
pub trait PackSource: Send + Sync {
    async fn fetch(&self, namespace: &str, pack_name: &str) -> Result<String>;
}

/// Filesystem-backed pack source reading
/// `<root>/<namespace>/<pack>/pack.json`.
pub struct FsPackSource {
    root: PathBuf,
}

impl FsPackSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PackSource for FsPackSource {
    async fn fetch(&self, namespace: &str, pack_name: &str) -> Result<String> {
        let path = self.root.join(namespace).join(pack_name).join("pack.json");
        if !path.exists() {
            return Err(Error::pack(
                format!("{namespace}/{pack_name}"),
                "pack.json not found",
            ));
        }
        std::fs::read_to_string(&path).map_err(Error::Io)
    }
}
