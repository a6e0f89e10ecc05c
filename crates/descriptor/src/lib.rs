//! Descriptor artifact loading.
//!
//! Parses the serialized `FileDescriptorSet` that protoc emits with
//! `--include_imports --descriptor_set_out` into an in-memory collection of
//! file descriptors: logical name, declared imports, declared services. The
//! artifact is re-parsed fresh on every run — there is no cross-run cache.

use prost::Message;
use prost_types::FileDescriptorSet;
use std::path::{Path, PathBuf};

/// Errors from loading the descriptor artifact.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor set not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: prost::DecodeError,
    },
}

/// A gRPC service declared in a proto file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Logical name of the proto file declaring the service.
    pub proto: String,
    /// Package-qualified service name, e.g. `"tsurugi.udf.Echo"`.
    pub full_name: String,
}

/// In-memory view of a parsed `FileDescriptorSet`.
#[derive(Debug)]
pub struct DescriptorSet {
    set: FileDescriptorSet,
}

impl DescriptorSet {
    /// Loads and decodes a descriptor artifact from disk.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        if !path.exists() {
            return Err(DescriptorError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&bytes).map_err(|source| DescriptorError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Decodes a descriptor set from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Ok(Self { set })
    }

    /// Iterates `(logical name, declared imports)` pairs in artifact order.
    pub fn imports(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.set
            .file
            .iter()
            .map(|fd| (fd.name(), fd.dependency.as_slice()))
    }

    /// All logical file names in the set.
    pub fn file_names(&self) -> Vec<&str> {
        self.set.file.iter().map(|fd| fd.name()).collect()
    }

    /// Whether the named proto declares at least one service.
    ///
    /// Drives which generated sources exist for a node: protos without a
    /// service produce only a `.pb.cc`, not a `.grpc.pb.cc`.
    pub fn has_services(&self, node: &str) -> bool {
        self.set
            .file
            .iter()
            .any(|fd| fd.name() == node && !fd.service.is_empty())
    }

    /// All declared services across the set, package-qualified.
    pub fn services(&self) -> Vec<ServiceInfo> {
        let mut out = Vec::new();
        for fd in &self.set.file {
            for svc in &fd.service {
                let full_name = if fd.package().is_empty() {
                    svc.name().to_string()
                } else {
                    format!("{}.{}", fd.package(), svc.name())
                };
                out.push(ServiceInfo {
                    proto: fd.name().to_string(),
                    full_name,
                });
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.set.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.file.is_empty()
    }
}
