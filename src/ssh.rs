//! SSH signatures made and checked by `ssh-keygen -Y`.
//!
//! There are libraries for SSH signatures, but they don't work with every
//! configuration (hardware keys, agent-held keys), so this backend runs
//! `ssh-keygen` as a subprocess:
//!
//! ```bash
//! ssh-keygen -Y sign -f <key> -n org.notaryproject.sign < payload > signature
//! ssh-keygen -Y verify -f <allowed_signers> -I <identity> \
//!     -n org.notaryproject.sign -s <signature file> < payload
//! ```
//!
//! Authorized signers are an OpenSSH `allowed_signers` file.

use std::ffi::OsStr;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use log::{debug, trace};

use crate::backend::SignatureBackend;
use crate::error::{Error, Result};
use crate::scheme::Scheme;

/// [`SignatureBackend`] that delegates to the `ssh-keygen` tool.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: PathBuf,
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::with_program("ssh-keygen")
    }
}

impl SshKeygen {
    /// Uses `ssh-keygen` from `$PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given `ssh-keygen` executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        SshKeygen {
            program: program.into(),
        }
    }

    /// Runs the tool with `payload` on stdin and collects its output.
    ///
    /// Only failures to start the tool are errors; the exit status is left
    /// to the caller.
    fn run(&self, args: &[&OsStr], payload: &[u8]) -> std::io::Result<Output> {
        trace!("running {} {:?}", self.program.display(), args);
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // The tool may exit before reading its input, e.g. on a bad key
            // path; its exit status reports that case.
            match stdin.write_all(payload) {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }

        child.wait_with_output()
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> String {
        format!("Error calling {}: {e}", self.program.display())
    }
}

fn diagnostics(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        output.status.to_string()
    } else {
        text
    }
}

impl SignatureBackend for SshKeygen {
    type KeyRef = Path;
    type Authorized = Path;

    fn signature_type(&self) -> &str {
        Scheme::notary().signature_type()
    }

    fn sign(&self, payload: &[u8], namespace: &str, identity: &str, key: &Path) -> Result<Vec<u8>> {
        if key.as_os_str().is_empty() {
            return Err(Error::SigningUnavailable("no key given".into()));
        }
        if !key.exists() {
            return Err(Error::SigningUnavailable(format!(
                "key file {} does not exist",
                key.display()
            )));
        }

        // ssh-keygen takes the identity from the key itself; it only matters
        // at verification time.
        debug!("signing as {identity} with {}", key.display());
        let args: [&OsStr; 6] = [
            "-Y".as_ref(),
            "sign".as_ref(),
            "-f".as_ref(),
            key.as_os_str(),
            "-n".as_ref(),
            namespace.as_ref(),
        ];
        let output = self
            .run(&args, payload)
            .map_err(|e| Error::SigningUnavailable(self.unavailable(e)))?;

        if !output.status.success() {
            return Err(Error::SigningRejected(diagnostics(&output)));
        }
        if output.stdout.is_empty() {
            return Err(Error::SigningRejected(format!(
                "{} produced no signature",
                self.program.display()
            )));
        }
        Ok(output.stdout)
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        namespace: &str,
        identity: &str,
        authorized: &Path,
    ) -> Result<()> {
        if authorized.as_os_str().is_empty() {
            return Err(Error::BackendUnavailable(
                "no allowed signers file given".into(),
            ));
        }

        // Removed when dropped, on every return path below.
        let mut sig_file = tempfile::Builder::new()
            .prefix("sig")
            .tempfile()
            .map_err(|e| Error::BackendUnavailable(format!("creating signature file: {e}")))?;
        sig_file
            .write_all(signature)
            .and_then(|()| sig_file.flush())
            .map_err(|e| Error::BackendUnavailable(format!("writing signature file: {e}")))?;

        let args: [&OsStr; 10] = [
            "-Y".as_ref(),
            "verify".as_ref(),
            "-f".as_ref(),
            authorized.as_os_str(),
            "-I".as_ref(),
            identity.as_ref(),
            "-n".as_ref(),
            namespace.as_ref(),
            "-s".as_ref(),
            sig_file.path().as_os_str(),
        ];
        let output = self
            .run(&args, payload)
            .map_err(|e| Error::BackendUnavailable(self.unavailable(e)))?;

        if !output.status.success() {
            return Err(Error::VerificationFailed(diagnostics(&output)));
        }
        debug!("ssh signature by {identity} verified");
        Ok(())
    }
}
