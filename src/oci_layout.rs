//! Reading and writing the index of an OCI image layout directory.
//!
//! Only the parts of the layout this crate touches are handled: the
//! `oci-layout` marker, `index.json` and, when writing to a different
//! directory, the `blobs/` tree the index refers to.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;
use oci_spec::image::{Digest, ImageIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use tempfile::NamedTempFile;

use crate::canonical;
use crate::error::{Error, Result};

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Serialize, Deserialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

fn invalid(root: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidLayout {
        path: root.to_path_buf(),
        reason: reason.into(),
    }
}

fn sha256_digest(data: &[u8]) -> Result<Digest> {
    let hex = hex::encode(Sha256::digest(data));
    format!("sha256:{hex}")
        .parse()
        .map_err(|e: oci_spec::OciSpecError| Error::MalformedPayload(e.to_string()))
}

/// An OCI image layout directory on disk.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// Opens an existing layout, checking its `oci-layout` marker.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let marker_path = root.join(LAYOUT_FILE);
        let raw = match fs::read(&marker_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(invalid(&root, "missing oci-layout file"))
            }
            Err(e) => return Err(Error::io(marker_path)(e)),
        };
        let marker: LayoutMarker = serde_json::from_slice(&raw)
            .map_err(|e| invalid(&root, format!("unreadable oci-layout file: {e}")))?;
        if !marker.image_layout_version.starts_with("1.") {
            return Err(invalid(
                &root,
                format!(
                    "unsupported layout version {}",
                    marker.image_layout_version
                ),
            ));
        }
        Ok(OciLayout { root })
    }

    /// Opens the layout at `root`, creating the directory and its marker if
    /// they do not exist yet.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.join(LAYOUT_FILE).exists() {
            return Self::open(root);
        }
        fs::create_dir_all(&root).map_err(Error::io(&root))?;
        let layout = OciLayout { root };
        let marker = serde_json::to_vec(&LayoutMarker {
            image_layout_version: LAYOUT_VERSION.to_string(),
        })
        .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        layout.write_atomic(LAYOUT_FILE, &marker)?;
        debug!("created OCI layout at {}", layout.root.display());
        Ok(layout)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn read_index(&self) -> Result<ImageIndex> {
        let path = self.root.join(INDEX_FILE);
        let raw = fs::read(&path).map_err(Error::io(&path))?;
        let malformed = |e: serde_json::Error| {
            Error::MalformedPayload(format!("{}: {e}", path.display()))
        };
        let value: Value = serde_json::from_slice(&raw).map_err(malformed)?;

        // Platforms are read separately so `os.version` and `os.features`
        // survive.
        let platforms = value
            .get("manifests")
            .and_then(Value::as_array)
            .map(|manifests| {
                manifests
                    .iter()
                    .map(|d| {
                        d.get("platform")
                            .filter(|p| !p.is_null())
                            .cloned()
                            .map(canonical::platform_from_json)
                            .transpose()
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let mut index: ImageIndex = serde_json::from_value(value).map_err(malformed)?;
        let manifests = index
            .manifests()
            .iter()
            .zip(platforms)
            .map(|(descriptor, platform)| {
                let mut descriptor = descriptor.clone();
                descriptor.set_platform(platform);
                descriptor
            })
            .collect();
        index.set_manifests(manifests);
        Ok(index)
    }

    /// Replaces `index.json` and returns the digest of the bytes written.
    ///
    /// Readers see either the old or the new index, never a partial one.
    pub fn write_index(&self, index: &ImageIndex) -> Result<Digest> {
        let mut value =
            serde_json::to_value(index).map_err(|e| Error::MalformedPayload(e.to_string()))?;
        if let Some(manifests) = value.get_mut("manifests").and_then(Value::as_array_mut) {
            for (json, descriptor) in manifests.iter_mut().zip(index.manifests()) {
                if let (Some(object), Some(platform)) =
                    (json.as_object_mut(), descriptor.platform())
                {
                    object.insert("platform".into(), canonical::platform_to_json(platform)?);
                }
            }
        }
        let json = serde_json::to_vec(&value).map_err(|e| Error::MalformedPayload(e.to_string()))?;
        self.write_atomic(INDEX_FILE, &json)?;
        let digest = sha256_digest(&json)?;
        debug!("wrote {} ({digest})", self.root.join(INDEX_FILE).display());
        Ok(digest)
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.root.join(name);
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(Error::io(&self.root))?;
        tmp.write_all(data).map_err(Error::io(tmp.path()))?;
        tmp.persist(&path).map_err(|e| Error::io(&path)(e.error))?;
        Ok(())
    }

    /// Copies the blobs of this layout that `target` lacks. Returns how
    /// many were copied.
    pub fn copy_blobs_to(&self, target: &OciLayout) -> Result<usize> {
        let source = self.root.join(BLOBS_DIR);
        if !source.exists() {
            return Ok(0);
        }
        let mut copied = 0;
        for algorithm in fs::read_dir(&source).map_err(Error::io(&source))? {
            let algorithm = algorithm.map_err(Error::io(&source))?;
            let from_dir = algorithm.path();
            if !from_dir.is_dir() {
                continue;
            }
            let to_dir = target.root.join(BLOBS_DIR).join(algorithm.file_name());
            fs::create_dir_all(&to_dir).map_err(Error::io(&to_dir))?;
            for blob in fs::read_dir(&from_dir).map_err(Error::io(&from_dir))? {
                let blob = blob.map_err(Error::io(&from_dir))?;
                let to = to_dir.join(blob.file_name());
                if to.exists() {
                    continue;
                }
                fs::copy(blob.path(), &to).map_err(Error::io(&to))?;
                copied += 1;
            }
        }
        debug!(
            "copied {copied} blobs from {} to {}",
            self.root.display(),
            target.root.display()
        );
        Ok(copied)
    }
}
