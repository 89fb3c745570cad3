// ABOUTME: Filesystem-backed resource storage for blueprint, deployment and plugin files
// ABOUTME: Paths are resolved under a root directory and may not escape it

use serde_json::json;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::error::{Result, StorageError};
use super::StorageDescriptor;
use crate::model::Properties;

pub const FILESYSTEM_API: &str = "filesystem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Blueprint,
    Deployment,
    Plugin,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Blueprint => write!(f, "blueprint"),
            ResourceKind::Deployment => write!(f, "deployment"),
            ResourceKind::Plugin => write!(f, "plugin"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceStorage {
    root: PathBuf,
    descriptor: StorageDescriptor,
}

impl ResourceStorage {
    pub async fn open(api: &str, connection: &Properties) -> Result<Self> {
        let descriptor = StorageDescriptor::new(api, connection.clone());
        match api {
            FILESYSTEM_API => {
                let root = PathBuf::from(descriptor.required_str("directory")?);
                tokio::fs::create_dir_all(&root).await?;
                debug!("Resource storage ready: {}", root.display());
                Ok(Self { root, descriptor })
            }
            other => Err(StorageError::UnknownApi(other.to_string())),
        }
    }

    pub async fn open_descriptor(descriptor: &StorageDescriptor) -> Result<Self> {
        Self::open(&descriptor.api, &descriptor.connection).await
    }

    pub async fn filesystem(directory: impl AsRef<Path>) -> Result<Self> {
        let mut connection = Properties::new();
        connection.insert(
            "directory".to_string(),
            json!(directory.as_ref().to_string_lossy()),
        );
        Self::open(FILESYSTEM_API, &connection).await
    }

    pub fn descriptor(&self) -> &StorageDescriptor {
        &self.descriptor
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `<root>/<kind>/<entry_id>/<path>`, refusing anything that would escape it
    fn resolve(&self, kind: ResourceKind, entry_id: &str, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.join(kind.to_string());
        for part in [entry_id, path] {
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(segment) => resolved.push(segment),
                    Component::CurDir => {}
                    _ => return Err(StorageError::InvalidPath(part.to_string())),
                }
            }
        }
        Ok(resolved)
    }

    pub async fn write(
        &self,
        kind: ResourceKind,
        entry_id: &str,
        path: &str,
        contents: impl AsRef<[u8]>,
    ) -> Result<()> {
        let target = self.resolve(kind, entry_id, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }

    pub async fn read(&self, kind: ResourceKind, entry_id: &str, path: &str) -> Result<Vec<u8>> {
        let source = self.resolve(kind, entry_id, path)?;
        Ok(tokio::fs::read(&source).await?)
    }

    /// Copy a local file into the store
    pub async fn upload(
        &self,
        kind: ResourceKind,
        entry_id: &str,
        source: &Path,
        path: &str,
    ) -> Result<()> {
        let contents = tokio::fs::read(source).await?;
        self.write(kind, entry_id, path, contents).await
    }

    /// Copy a stored file out to a local destination
    pub async fn download(
        &self,
        kind: ResourceKind,
        entry_id: &str,
        path: &str,
        destination: &Path,
    ) -> Result<()> {
        let contents = self.read(kind, entry_id, path).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, contents).await?;
        Ok(())
    }

    /// File names stored directly under an entry, sorted
    pub async fn list(&self, kind: ResourceKind, entry_id: &str) -> Result<Vec<String>> {
        let directory = self.resolve(kind, entry_id, "")?;
        if !directory.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
