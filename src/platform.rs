//! Selecting an index entry by platform.

use std::fmt;
use std::str::FromStr;

use oci_spec::image::Platform;

use crate::error::Error;

/// A platform requested as `os/arch[/variant]`, e.g. `linux/arm64/v8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSelector {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl PlatformSelector {
    /// The platform of the running host, see [`default_platform_name`].
    pub fn native() -> Self {
        PlatformSelector {
            os: native_os().to_string(),
            architecture: native_arch().0.to_string(),
            variant: native_arch().1.map(str::to_string),
        }
    }

    /// Whether `platform` is the requested one.
    ///
    /// OS, architecture and variant must all be equal; a selector without a
    /// variant only matches platforms without one.
    pub fn matches(&self, platform: &Platform) -> bool {
        platform.os().to_string() == self.os
            && platform.architecture().to_string() == self.architecture
            && platform.variant().as_deref() == self.variant.as_deref()
    }
}

impl FromStr for PlatformSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| Error::InvalidPlatform {
            platform: s.to_string(),
            reason,
        };
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() < 2 {
            return Err(invalid("expected format os/arch[/variant]"));
        }
        if parts.len() > 3 {
            return Err(invalid("too many slashes"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty component"));
        }
        Ok(PlatformSelector {
            os: parts[0].to_string(),
            architecture: parts[1].to_string(),
            variant: parts.get(2).map(|v| v.to_string()),
        })
    }
}

impl fmt::Display for PlatformSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

fn native_os() -> &'static str {
    match std::env::consts::OS {
        // Images for macOS hosts are linux images run in a VM; a darwin
        // default is never what is wanted.
        "macos" => "linux",
        os => os,
    }
}

fn native_arch() -> (&'static str, Option<&'static str>) {
    match std::env::consts::ARCH {
        "x86_64" => ("amd64", None),
        "x86" => ("386", None),
        // Images mark arm64 as arm64/v8 these days.
        "aarch64" => ("arm64", Some("v8")),
        "arm" => ("arm", Some("v7")),
        "powerpc64" => ("ppc64", None),
        "s390x" => ("s390x", None),
        "riscv64" => ("riscv64", None),
        arch => (arch, None),
    }
}

/// The `os/arch[/variant]` name of the running host.
pub fn default_platform_name() -> String {
    PlatformSelector::native().to_string()
}
