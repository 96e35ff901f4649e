//! Verifying signed index entries.
//!
//! A valid signature only proves that *some* descriptor was signed. The
//! descriptor actually present in the index may have been swapped for
//! another while the signature annotations were copied over, so after the
//! backend has accepted the signature, the signed descriptor is decoded and
//! compared field by field with the live one.
//!
//! Everything the live descriptor says must be backed by the signed copy.
//! The signed copy may carry more (an annotation added by a newer signer,
//! say); that is not an error. The live descriptor's signature annotations
//! are skipped because they cannot have existed when it was signed.

use std::collections::HashMap;
use std::fmt;

use log::debug;
use oci_spec::image::{Descriptor, ImageIndex, Platform};

use crate::annotations::{self, Layout, SignatureRecord};
use crate::backend::SignatureBackend;
use crate::canonical;
use crate::error::{DescriptorField, Error, Result};
use crate::platform::PlatformSelector;
use crate::scheme::{Scheme, SignatureKey};

/// Verifies index descriptors with a [`SignatureBackend`].
#[derive(Debug)]
pub struct IndexVerifier<B> {
    backend: B,
}

impl<B: SignatureBackend> IndexVerifier<B> {
    pub fn new(backend: B) -> Self {
        IndexVerifier { backend }
    }

    /// Verifies one descriptor.
    ///
    /// The signature is looked up on the descriptor itself and, for
    /// indexes signed by older tools, in `index_annotations`. On success the
    /// decoded signature record is returned.
    pub fn verify_one(
        &self,
        descriptor: &Descriptor,
        index_annotations: Option<&HashMap<String, String>>,
        authorized: &B::Authorized,
    ) -> Result<SignatureRecord> {
        let digest = descriptor.digest();
        let own = descriptor.annotations().as_ref();

        let found = Layout::detect(own, index_annotations, digest).and_then(|layout| {
            let source = match layout {
                Layout::PerDescriptor => own,
                Layout::IndexWide => index_annotations,
            };
            source.map(|source| (layout, source))
        });
        let Some((layout, source)) = found else {
            return Err(Error::SignatureNotFound {
                digest: digest.to_string(),
                missing: Scheme::notary().key(SignatureKey::Version),
            });
        };
        let record = annotations::decode(source, digest, layout)?;

        if record.signature_type != self.backend.signature_type() {
            return Err(Error::UnsupportedType(record.signature_type));
        }

        self.backend.verify(
            &record.descriptor,
            &record.signature,
            Scheme::notary().namespace(),
            &record.identity,
            authorized,
        )?;

        // Only now is the signed descriptor trusted enough to compare with.
        let signed = canonical::decode(&record.descriptor)?;
        compare_descriptors(&signed, descriptor)?;

        debug!("verified {digest} signed by {} ({layout})", record.identity);
        Ok(record)
    }

    /// Verifies every descriptor of `index`.
    ///
    /// Fails on the first descriptor that does not verify. An index without
    /// descriptors is an error rather than a vacuous success.
    pub fn verify_all(
        &self,
        index: &ImageIndex,
        authorized: &B::Authorized,
    ) -> Result<Vec<SignatureRecord>> {
        if index.manifests().is_empty() {
            return Err(Error::EmptyIndex);
        }
        index
            .manifests()
            .iter()
            .map(|d| self.verify_one(d, index.annotations().as_ref(), authorized))
            .collect()
    }

    /// Verifies the descriptor of `index` for `platform` and returns it.
    ///
    /// Other descriptors are ignored. When several descriptors match, the
    /// first one is used.
    pub fn verify_for_platform<'a>(
        &self,
        index: &'a ImageIndex,
        platform: &PlatformSelector,
        authorized: &B::Authorized,
    ) -> Result<&'a Descriptor> {
        let descriptor = index
            .manifests()
            .iter()
            .find(|d| d.platform().as_ref().is_some_and(|p| platform.matches(p)))
            .ok_or_else(|| Error::PlatformNotFound(platform.to_string()))?;
        self.verify_one(descriptor, index.annotations().as_ref(), authorized)?;
        Ok(descriptor)
    }
}

fn check<T: PartialEq + fmt::Display + ?Sized>(
    field: DescriptorField,
    signed: &T,
    live: &T,
) -> Result<()> {
    if signed == live {
        Ok(())
    } else {
        Err(Error::mismatch(field, signed, live))
    }
}

/// Compares two ordered lists: length first, then each position.
fn check_list(
    count: DescriptorField,
    item: impl Fn(usize) -> DescriptorField,
    signed: Option<&[String]>,
    live: Option<&[String]>,
) -> Result<()> {
    let signed = signed.unwrap_or_default();
    let live = live.unwrap_or_default();
    check(count, &signed.len(), &live.len())?;
    for (i, (s, l)) in signed.iter().zip(live).enumerate() {
        check(item(i), s, l)?;
    }
    Ok(())
}

fn compare_platforms(signed: Option<&Platform>, live: Option<&Platform>) -> Result<()> {
    let (signed, live) = match (signed, live) {
        (None, None) => return Ok(()),
        (Some(signed), Some(live)) => (signed, live),
        (signed, live) => {
            let show = |p: Option<&Platform>| match p {
                Some(p) => format!("{}/{}", p.os(), p.architecture()),
                None => "none".to_string(),
            };
            return Err(Error::mismatch(
                DescriptorField::Platform,
                show(signed),
                show(live),
            ));
        }
    };

    check(
        DescriptorField::Architecture,
        signed.architecture(),
        live.architecture(),
    )?;
    check(DescriptorField::Os, signed.os(), live.os())?;
    check(
        DescriptorField::OsVersion,
        signed.os_version().as_deref().unwrap_or_default(),
        live.os_version().as_deref().unwrap_or_default(),
    )?;
    check(
        DescriptorField::Variant,
        signed.variant().as_deref().unwrap_or_default(),
        live.variant().as_deref().unwrap_or_default(),
    )?;
    check_list(
        DescriptorField::OsFeatureCount,
        DescriptorField::OsFeature,
        signed.os_features().as_deref(),
        live.os_features().as_deref(),
    )?;
    check_list(
        DescriptorField::FeatureCount,
        DescriptorField::Feature,
        signed.features().as_deref(),
        live.features().as_deref(),
    )
}

/// Checks that everything `live` claims is covered by `signed`.
pub fn compare_descriptors(signed: &Descriptor, live: &Descriptor) -> Result<()> {
    check(
        DescriptorField::MediaType,
        signed.media_type(),
        live.media_type(),
    )?;
    let artifact_type = |d: &Descriptor| {
        d.artifact_type()
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    };
    check(
        DescriptorField::ArtifactType,
        &artifact_type(signed),
        &artifact_type(live),
    )?;
    check(DescriptorField::Size, &signed.size(), &live.size())?;
    check(
        DescriptorField::DigestAlgorithm,
        signed.digest().algorithm(),
        live.digest().algorithm(),
    )?;
    check(
        DescriptorField::DigestHex,
        signed.digest().digest(),
        live.digest().digest(),
    )?;
    check_list(
        DescriptorField::UrlCount,
        DescriptorField::Url,
        signed.urls().as_deref(),
        live.urls().as_deref(),
    )?;
    compare_platforms(signed.platform().as_ref(), live.platform().as_ref())?;

    let scheme = Scheme::notary();
    let empty = HashMap::new();
    let signed_annotations = signed.annotations().as_ref().unwrap_or(&empty);
    if let Some(live_annotations) = live.annotations() {
        for (key, value) in live_annotations {
            if scheme.is_reserved(key) {
                continue;
            }
            match signed_annotations.get(key) {
                Some(signed_value) if signed_value == value => {}
                signed_value => {
                    return Err(Error::mismatch(
                        DescriptorField::Annotation(key.clone()),
                        signed_value.map(String::as_str).unwrap_or_default(),
                        value,
                    ))
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::engine::{general_purpose::STANDARD as BASE64, Engine};
    use oci_spec::image::MediaType;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::sign::IndexSigner;
    use crate::test::{descriptor, digest, index, platform, FakeBackend};

    fn signed(desc: &Descriptor, backend: &FakeBackend) -> Descriptor {
        IndexSigner::new(backend)
            .sign_descriptor(desc, "alice", "key")
            .unwrap()
    }

    fn annotated(c: char) -> Descriptor {
        let mut desc = descriptor(c, Some(platform("linux", "amd64", None)));
        desc.set_urls(Some(vec![
            "https://mirror.example/one".into(),
            "https://mirror.example/two".into(),
        ]));
        desc.set_annotations(Some(HashMap::from([(
            "org.opencontainers.image.ref.name".to_string(),
            "v1".to_string(),
        )])));
        desc
    }

    fn expect_mismatch(result: Result<SignatureRecord>, expected: DescriptorField) {
        match result {
            Err(Error::DescriptorMismatch { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected mismatch in {expected}, got {other:?}"),
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let backend = FakeBackend::default();
        let live = signed(&annotated('a'), &backend);
        let record = IndexVerifier::new(&backend)
            .verify_one(&live, None, &["alice"])
            .unwrap();
        assert_eq!(record.identity, "alice");
        assert_eq!(record.layout, Layout::PerDescriptor);
    }

    #[test]
    fn test_unauthorized_identity() {
        let backend = FakeBackend::default();
        let live = signed(&annotated('a'), &backend);
        let err = IndexVerifier::new(&backend)
            .verify_one(&live, None, &["bob"])
            .unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_tampered_size() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_size(4321);
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::Size,
        );
    }

    #[test]
    fn test_tampered_digest() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_digest(digest('f'));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::DigestHex,
        );
    }

    #[test]
    fn test_tampered_url() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_urls(Some(vec![
            "https://mirror.example/one".into(),
            "https://evil.example/two".into(),
        ]));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::Url(1),
        );
    }

    #[test]
    fn test_dropped_url() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_urls(None);
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::UrlCount,
        );
    }

    #[test]
    fn test_tampered_architecture() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_platform(Some(platform("linux", "arm64", None)));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::Architecture,
        );
    }

    #[test]
    fn test_removed_platform() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_platform(None);
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::Platform,
        );
    }

    #[test]
    fn test_tampered_os_features() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        let mut plat = live.platform().clone().unwrap();
        plat.set_os_features(Some(vec!["win32k".into()]));
        live.set_platform(Some(plat));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::OsFeatureCount,
        );
    }

    #[test]
    fn test_tampered_annotation() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        let mut annotations = live.annotations().clone().unwrap();
        annotations.insert("org.opencontainers.image.ref.name".into(), "latest".into());
        live.set_annotations(Some(annotations));

        let err = IndexVerifier::new(&backend)
            .verify_one(&live, None, &["alice"])
            .unwrap_err();
        match err {
            Error::DescriptorMismatch {
                field,
                signed,
                live,
            } => {
                assert_eq!(
                    field,
                    DescriptorField::Annotation("org.opencontainers.image.ref.name".into())
                );
                assert_eq!(signed, "v1");
                assert_eq!(live, "latest");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_added_annotation() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        let mut annotations = live.annotations().clone().unwrap();
        annotations.insert("com.example.injected".into(), "yes".into());
        live.set_annotations(Some(annotations));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::Annotation("com.example.injected".into()),
        );
    }

    #[test]
    fn test_extra_signed_annotation_tolerated() {
        let backend = FakeBackend::default();
        let mut with_expiry = annotated('a');
        let mut annotations = with_expiry.annotations().clone().unwrap();
        annotations.insert("com.example.expires".into(), "2030-01-01".into());
        with_expiry.set_annotations(Some(annotations));
        let signed_desc = signed(&with_expiry, &backend);

        // The live descriptor lost the annotation the signer added.
        let mut live = signed_desc.clone();
        let mut annotations = live.annotations().clone().unwrap();
        annotations.remove("com.example.expires");
        live.set_annotations(Some(annotations));

        IndexVerifier::new(&backend)
            .verify_one(&live, None, &["alice"])
            .unwrap();
    }

    #[test]
    fn test_reserved_live_keys_ignored() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        let mut annotations = live.annotations().clone().unwrap();
        annotations.insert("org.notaryproject.signature.comment".into(), "hi".into());
        annotations.insert(
            format!("org.notaryproject.signature.version.{}", digest('e')),
            "9.9".into(),
        );
        live.set_annotations(Some(annotations));

        IndexVerifier::new(&backend)
            .verify_one(&live, None, &["alice"])
            .unwrap();
    }

    #[test]
    fn test_tampered_artifact_type() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        live.set_artifact_type(Some(MediaType::Other(
            "application/vnd.example.sbom".into(),
        )));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&live, None, &["alice"]),
            DescriptorField::ArtifactType,
        );
    }

    #[test]
    fn test_os_version_and_features_verify() {
        let backend = FakeBackend::default();
        let mut plat = platform("windows", "amd64", None);
        plat.set_os_version(Some("10.0.17763.1".into()));
        plat.set_os_features(Some(vec!["win32k".into()]));
        let live = signed(&descriptor('c', Some(plat.clone())), &backend);

        IndexVerifier::new(&backend)
            .verify_one(&live, None, &["alice"])
            .unwrap();

        let mut swapped = live.clone();
        plat.set_os_version(Some("10.0.20348.1".into()));
        swapped.set_platform(Some(plat));
        expect_mismatch(
            IndexVerifier::new(&backend).verify_one(&swapped, None, &["alice"]),
            DescriptorField::OsVersion,
        );
    }

    #[test]
    fn test_signature_checked_before_payload_is_decoded() {
        let backend = FakeBackend::default();
        let mut live = signed(&annotated('a'), &backend);
        let mut annotations = live.annotations().clone().unwrap();
        annotations.insert(
            "org.notaryproject.signature.descriptor".into(),
            BASE64.encode("not json"),
        );
        live.set_annotations(Some(annotations));

        let err = IndexVerifier::new(&backend)
            .verify_one(&live, None, &["alice"])
            .unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)), "unexpected error: {err}");
        assert_eq!(backend.verifies.get(), 1);
    }

    #[test]
    fn test_missing_signature() {
        let backend = FakeBackend::default();
        let err = IndexVerifier::new(&backend)
            .verify_one(&annotated('a'), None, &["alice"])
            .unwrap_err();
        assert!(matches!(err, Error::SignatureNotFound { .. }), "unexpected error: {err}");
        assert_eq!(backend.verifies.get(), 0);
    }

    #[test]
    fn test_version_and_type_gated_before_backend() {
        let backend = FakeBackend::default();
        let live = signed(&annotated('a'), &backend);

        let mut bad_version = live.clone();
        let mut annotations = bad_version.annotations().clone().unwrap();
        annotations.insert("org.notaryproject.signature.version".into(), "1.0".into());
        bad_version.set_annotations(Some(annotations));
        let err = IndexVerifier::new(&backend)
            .verify_one(&bad_version, None, &["alice"])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { .. }), "unexpected error: {err}");

        let mut bad_type = live.clone();
        let mut annotations = bad_type.annotations().clone().unwrap();
        annotations.insert("org.notaryproject.signature.type".into(), "gpg".into());
        bad_type.set_annotations(Some(annotations));
        let err = IndexVerifier::new(&backend)
            .verify_one(&bad_type, None, &["alice"])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)), "unexpected error: {err}");

        assert_eq!(backend.verifies.get(), 0);
    }

    #[test]
    fn test_legacy_index_wide_signature() {
        let backend = FakeBackend::default();
        let desc = annotated('a');
        let signed_desc = signed(&desc, &backend);

        // Move the signature keys into the index annotations, suffixed by
        // digest, the way older tools stored them.
        let own = signed_desc.annotations().clone().unwrap();
        let record = annotations::decode(&own, desc.digest(), Layout::PerDescriptor).unwrap();
        let legacy = annotations::encode(&record, Layout::IndexWide, desc.digest());
        let mut idx = index(vec![desc]);
        idx.set_annotations(Some(legacy));

        let records = IndexVerifier::new(&backend)
            .verify_all(&idx, &["alice"])
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].layout, Layout::IndexWide);
    }

    #[test]
    fn test_verify_all_fails_on_first_bad_descriptor() {
        let backend = FakeBackend::default();
        let good = signed(&annotated('a'), &backend);
        let unsigned = annotated('b');
        let idx = index(vec![good, unsigned]);

        let err = IndexVerifier::new(&backend)
            .verify_all(&idx, &["alice"])
            .unwrap_err();
        match err {
            Error::SignatureNotFound { digest: d, .. } => assert_eq!(d, digest('b').to_string()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_all_empty_index() {
        let backend = FakeBackend::default();
        let err = IndexVerifier::new(&backend)
            .verify_all(&index(vec![]), &["alice"])
            .unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));
    }

    #[test]
    fn test_platform_not_found() {
        let backend = FakeBackend::default();
        let idx = index(vec![
            signed(&descriptor('a', Some(platform("linux", "arm64", None))), &backend),
            signed(&descriptor('b', Some(platform("darwin", "amd64", None))), &backend),
        ]);
        let err = IndexVerifier::new(&backend)
            .verify_for_platform(&idx, &"linux/amd64".parse().unwrap(), &["alice"])
            .unwrap_err();
        assert!(
            matches!(&err, Error::PlatformNotFound(p) if p == "linux/amd64"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_platform_selects_single_match() {
        let backend = FakeBackend::default();
        // Only the amd64 entry is signed, so verifying any other would fail.
        let idx = index(vec![
            descriptor('a', Some(platform("linux", "arm64", None))),
            signed(&descriptor('b', Some(platform("linux", "amd64", None))), &backend),
            descriptor('c', Some(platform("darwin", "amd64", None))),
        ]);
        let found = IndexVerifier::new(&backend)
            .verify_for_platform(&idx, &"linux/amd64".parse().unwrap(), &["alice"])
            .unwrap();
        assert_eq!(found.digest(), &digest('b'));
        assert_eq!(backend.verifies.get(), 1);
    }
}
