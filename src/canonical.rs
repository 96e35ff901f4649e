//! Canonical byte encoding of index descriptors.
//!
//! The bytes produced here are what gets signed, and verification later
//! decodes exactly those bytes again. The encoding is JSON using the OCI
//! field names, with object members in lexicographic order and the
//! annotation map sorted by key, so a descriptor value always encodes to the
//! same bytes no matter how its annotation map was built.
//!
//! The embedded `data` field of a descriptor is not part of the encoding;
//! anything that consumes it has to check it against the digest anyway.
//!
//! Platform fields use the OCI names `os.version` and `os.features`. The
//! serde impls of `oci_spec` spell those differently, so both directions go
//! through the structs here rather than through `oci_spec`'s own serde.

use std::collections::{BTreeMap, HashMap};

use oci_spec::image::{
    Arch, Descriptor, DescriptorBuilder, Digest, MediaType, Os, Platform, PlatformBuilder,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Field order of both structs is the serialization order and must stay
// sorted by the renamed JSON key.

#[derive(Serialize)]
struct CanonicalDescriptor<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<&'a str, &'a str>>,
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    artifact_type: Option<&'a MediaType>,
    digest: &'a Digest,
    #[serde(rename = "mediaType")]
    media_type: &'a MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<CanonicalPlatform<'a>>,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    urls: Option<&'a [String]>,
}

#[derive(Serialize)]
pub(crate) struct CanonicalPlatform<'a> {
    architecture: &'a Arch,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<&'a [String]>,
    os: &'a Os,
    #[serde(rename = "os.features", skip_serializing_if = "Option::is_none")]
    os_features: Option<&'a [String]>,
    #[serde(rename = "os.version", skip_serializing_if = "Option::is_none")]
    os_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant: Option<&'a str>,
}

impl<'a> From<&'a Platform> for CanonicalPlatform<'a> {
    fn from(platform: &'a Platform) -> Self {
        CanonicalPlatform {
            architecture: platform.architecture(),
            features: platform.features().as_deref(),
            os: platform.os(),
            os_features: platform.os_features().as_deref(),
            os_version: platform.os_version().as_deref(),
            variant: platform.variant().as_deref(),
        }
    }
}

impl<'a> From<&'a Descriptor> for CanonicalDescriptor<'a> {
    fn from(descriptor: &'a Descriptor) -> Self {
        CanonicalDescriptor {
            annotations: descriptor.annotations().as_ref().map(|annotations| {
                annotations
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect()
            }),
            artifact_type: descriptor.artifact_type().as_ref(),
            digest: descriptor.digest(),
            media_type: descriptor.media_type(),
            platform: descriptor.platform().as_ref().map(CanonicalPlatform::from),
            size: descriptor.size(),
            urls: descriptor.urls().as_deref(),
        }
    }
}

/// Encodes `descriptor` into its canonical signing payload.
pub fn encode(descriptor: &Descriptor) -> Result<Vec<u8>> {
    serde_json::to_vec(&CanonicalDescriptor::from(descriptor))
        .map_err(|e| Error::MalformedPayload(format!("encoding descriptor: {e}")))
}

#[derive(Deserialize)]
struct SignedDescriptor {
    annotations: Option<HashMap<String, String>>,
    #[serde(rename = "artifactType")]
    artifact_type: Option<MediaType>,
    digest: Digest,
    #[serde(rename = "mediaType")]
    media_type: MediaType,
    platform: Option<SignedPlatform>,
    size: u64,
    urls: Option<Vec<String>>,
}

/// Owned platform as found in signed payloads and `index.json`.
///
/// The underscore spellings are accepted too, since that is what
/// `oci_spec` writes.
#[derive(Deserialize)]
pub(crate) struct SignedPlatform {
    architecture: Arch,
    features: Option<Vec<String>>,
    os: Os,
    #[serde(rename = "os.features", alias = "os_features")]
    os_features: Option<Vec<String>>,
    #[serde(rename = "os.version", alias = "os_version")]
    os_version: Option<String>,
    variant: Option<String>,
}

fn malformed(what: &str) -> impl Fn(oci_spec::OciSpecError) -> Error + '_ {
    move |e| Error::MalformedPayload(format!("{what}: {e}"))
}

impl SignedPlatform {
    pub(crate) fn into_platform(self) -> Result<Platform> {
        let mut platform = PlatformBuilder::default()
            .architecture(self.architecture)
            .os(self.os)
            .build()
            .map_err(malformed("building platform"))?;
        platform.set_features(self.features);
        platform.set_os_features(self.os_features);
        platform.set_os_version(self.os_version);
        platform.set_variant(self.variant);
        Ok(platform)
    }
}

impl SignedDescriptor {
    fn into_descriptor(self) -> Result<Descriptor> {
        let mut descriptor = DescriptorBuilder::default()
            .media_type(self.media_type)
            .digest(self.digest)
            .size(self.size)
            .build()
            .map_err(malformed("building descriptor"))?;
        descriptor.set_annotations(self.annotations);
        descriptor.set_artifact_type(self.artifact_type);
        descriptor.set_urls(self.urls);
        descriptor.set_platform(self.platform.map(SignedPlatform::into_platform).transpose()?);
        Ok(descriptor)
    }
}

/// Decodes a payload produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Descriptor> {
    serde_json::from_slice::<SignedDescriptor>(bytes)
        .map_err(|e| Error::MalformedPayload(format!("decoding signed descriptor: {e}")))?
        .into_descriptor()
}

/// JSON object for `platform` with the OCI field names.
pub(crate) fn platform_to_json(platform: &Platform) -> Result<serde_json::Value> {
    serde_json::to_value(CanonicalPlatform::from(platform))
        .map_err(|e| Error::MalformedPayload(format!("encoding platform: {e}")))
}

/// Reads a platform JSON object written with either field spelling.
pub(crate) fn platform_from_json(value: serde_json::Value) -> Result<Platform> {
    serde_json::from_value::<SignedPlatform>(value)
        .map_err(|e| Error::MalformedPayload(format!("decoding platform: {e}")))?
        .into_platform()
}
