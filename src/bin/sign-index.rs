use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sign_index::{
    default_platform_name, IndexSigner, IndexVerifier, Layout, OciLayout, PlatformSelector,
    ResignPolicy, SignOptions, SshKeygen,
};

/// sign-index
#[derive(Debug, Parser)]
#[clap(name = "sign-index", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Signs every entry of the index in an OCI image layout
    Sign {
        /// private key to sign with
        #[clap(long)]
        keyfile: PathBuf,
        /// identity of the signer
        #[clap(short = 'I', long)]
        identity: String,
        /// type of signing key
        #[clap(long = "type", default_value = "ssh")]
        signature_type: String,
        /// write the signed index to this layout instead of in place
        #[clap(long)]
        output: Option<PathBuf>,
        /// fail instead of replacing existing signatures
        #[clap(long)]
        no_resign: bool,
        /// ssh-keygen executable to use
        #[clap(long, default_value = "ssh-keygen")]
        ssh_keygen: PathBuf,
        /// the OCI image layout directory
        layout: PathBuf,
    },
    /// Verifies the signatures of an index, all entries unless a platform is given
    Verify {
        /// allowed_signers file listing accepted identities and keys
        #[clap(long)]
        allowed: PathBuf,
        /// only verify the entry for os/arch[/variant] (e.g. linux/amd64)
        #[clap(long, conflicts_with = "native")]
        platform: Option<PlatformSelector>,
        /// only verify the entry for the platform of this host
        #[clap(long)]
        native: bool,
        /// ssh-keygen executable to use
        #[clap(long, default_value = "ssh-keygen")]
        ssh_keygen: PathBuf,
        /// the OCI image layout directory
        layout: PathBuf,
    },
    /// Lists the entries of an index and who signed them, without verifying
    Inspect {
        /// the OCI image layout directory
        layout: PathBuf,
    },
}

fn open_index(path: &PathBuf) -> Result<(OciLayout, oci_spec::image::ImageIndex)> {
    let layout =
        OciLayout::open(path).with_context(|| format!("Opening layout {}", path.display()))?;
    let index = layout
        .read_index()
        .with_context(|| format!("Reading index of {}", path.display()))?;
    Ok((layout, index))
}

/// The single platform to verify, or `None` to verify the whole index.
fn requested_platform(
    platform: Option<PlatformSelector>,
    native: bool,
) -> Result<Option<PlatformSelector>> {
    Ok(match platform {
        Some(platform) => Some(platform),
        None if native => Some(default_platform_name().parse()?),
        None => None,
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Sign {
            keyfile,
            identity,
            signature_type,
            output,
            no_resign,
            ssh_keygen,
            layout,
        } => {
            let (source, index) = open_index(&layout)?;
            let options = SignOptions {
                resign: if no_resign {
                    ResignPolicy::Reject
                } else {
                    ResignPolicy::Overwrite
                },
                signature_type: Some(signature_type),
            };
            let signer = IndexSigner::with_options(SshKeygen::with_program(ssh_keygen), options);
            let signed = signer
                .sign_index(&index, &identity, &keyfile)
                .context("Signing error")?;

            let target = match output {
                Some(path) => {
                    let target = OciLayout::create(&path)
                        .with_context(|| format!("Creating layout {}", path.display()))?;
                    source.copy_blobs_to(&target)?;
                    target
                }
                None => source,
            };
            let digest = target.write_index(&signed).with_context(|| {
                format!("Writing index to {}", target.path().display())
            })?;
            println!("{digest}");
        }
        Command::Verify {
            allowed,
            platform,
            native,
            ssh_keygen,
            layout,
        } => {
            let (_, index) = open_index(&layout)?;
            let verifier = IndexVerifier::new(SshKeygen::with_program(ssh_keygen));
            match requested_platform(platform, native)? {
                Some(platform) => {
                    let descriptor = verifier.verify_for_platform(&index, &platform, &allowed)?;
                    println!("Validated signature for {platform} ({})", descriptor.digest());
                }
                None => {
                    let records = verifier.verify_all(&index, &allowed)?;
                    println!(
                        "Validated signatures for all {} images in index",
                        records.len()
                    );
                }
            }
        }
        Command::Inspect { layout } => {
            let (_, index) = open_index(&layout)?;
            for descriptor in index.manifests() {
                let platform = match descriptor.platform() {
                    Some(p) => match p.variant() {
                        Some(v) => format!("{}/{}/{v}", p.os(), p.architecture()),
                        None => format!("{}/{}", p.os(), p.architecture()),
                    },
                    None => "-".to_string(),
                };
                let digest = descriptor.digest();
                let signer = match Layout::detect(
                    descriptor.annotations().as_ref(),
                    index.annotations().as_ref(),
                    digest,
                ) {
                    Some(layout) => {
                        let source = match layout {
                            Layout::PerDescriptor => descriptor.annotations(),
                            Layout::IndexWide => index.annotations(),
                        };
                        match source
                            .as_ref()
                            .map(|a| sign_index::annotations::decode(a, digest, layout))
                        {
                            Some(Ok(record)) => format!("signed by {} ({layout})", record.identity),
                            Some(Err(e)) => format!("unusable signature: {e}"),
                            None => "unsigned".to_string(),
                        }
                    }
                    None => "unsigned".to_string(),
                };
                println!("{digest} {platform} {signer}");
            }
        }
    }
    Ok(())
}
