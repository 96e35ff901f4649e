//! Signing and verification of multi-platform OCI image index entries.
//!
//! Every descriptor of an image index can carry a detached signature over a
//! canonical encoding of itself, stored in the descriptor's annotations.
//! [`IndexSigner`] adds those signatures; [`IndexVerifier`] checks them,
//! either for the whole index or for the entry matching one platform, and
//! makes sure the live descriptor is the one that was signed.
//!
//! Signatures are made by a [`SignatureBackend`]; [`SshKeygen`] uses
//! `ssh-keygen -Y`.

pub mod annotations;
pub mod backend;
pub mod canonical;
pub mod error;
pub mod oci_layout;
pub mod platform;
pub mod scheme;
pub mod sign;
pub mod ssh;
pub mod verify;


pub use annotations::{Layout, SignatureRecord};
pub use backend::SignatureBackend;
pub use error::{DescriptorField, Error, Result};
pub use oci_layout::OciLayout;
pub use platform::{default_platform_name, PlatformSelector};
pub use scheme::Scheme;
pub use sign::{IndexSigner, ResignPolicy, SignOptions};
pub use ssh::SshKeygen;
pub use verify::IndexVerifier;
