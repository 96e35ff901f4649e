#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use oci_spec::image::{
    Arch, Descriptor, DescriptorBuilder, ImageIndex, ImageIndexBuilder, MediaType, Os,
    PlatformBuilder,
};
use sha2::{Digest as _, Sha256};

use sign_index::{Error, Result, SignatureBackend};

/// Keyed-hash stand-in for ssh-keygen: each identity has a secret, and an
/// allowed set maps identities to the secret expected for them.
pub struct KeyedBackend;

pub struct Allowed(pub HashMap<String, String>);

impl Allowed {
    pub fn of(entries: &[(&str, &str)]) -> Self {
        Allowed(
            entries
                .iter()
                .map(|(who, key)| (who.to_string(), key.to_string()))
                .collect(),
        )
    }
}

fn mac(key: &str, namespace: &str, payload: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0]);
    hasher.update(namespace.as_bytes());
    hasher.update([0]);
    hasher.update(payload);
    hasher.finalize().to_vec()
}

impl SignatureBackend for KeyedBackend {
    type KeyRef = str;
    type Authorized = Allowed;

    fn signature_type(&self) -> &str {
        "ssh"
    }

    fn sign(&self, payload: &[u8], namespace: &str, _identity: &str, key: &str) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::SigningUnavailable("no key given".into()));
        }
        Ok(mac(key, namespace, payload))
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        namespace: &str,
        identity: &str,
        authorized: &Allowed,
    ) -> Result<()> {
        let key = authorized.0.get(identity).ok_or_else(|| {
            Error::VerificationFailed(format!("no principal matched {identity}"))
        })?;
        if mac(key, namespace, payload) != signature {
            return Err(Error::VerificationFailed("signature did not verify".into()));
        }
        Ok(())
    }
}

pub fn descriptor(c: char, os: &str, arch: &str) -> Descriptor {
    let mut descriptor = DescriptorBuilder::default()
        .media_type(MediaType::ImageManifest)
        .digest(
            format!("sha256:{}", c.to_string().repeat(64))
                .parse::<oci_spec::image::Digest>()
                .unwrap(),
        )
        .size(528u64)
        .build()
        .unwrap();
    descriptor.set_platform(Some(
        PlatformBuilder::default()
            .architecture(Arch::from(arch))
            .os(Os::from(os))
            .build()
            .unwrap(),
    ));
    descriptor
}

pub fn index(manifests: Vec<Descriptor>) -> ImageIndex {
    ImageIndexBuilder::default()
        .schema_version(2u32)
        .media_type(MediaType::ImageIndex)
        .manifests(manifests)
        .build()
        .unwrap()
}

/// Keys of the annotations `after` has and `before` lacks.
pub fn added_keys(before: &Descriptor, after: &Descriptor) -> HashSet<String> {
    let before: HashSet<_> = before
        .annotations()
        .iter()
        .flatten()
        .map(|(k, _)| k.clone())
        .collect();
    after
        .annotations()
        .iter()
        .flatten()
        .map(|(k, _)| k.clone())
        .filter(|k| !before.contains(k))
        .collect()
}
