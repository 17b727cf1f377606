// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Encrypted source entry handling.
//!
//! Source entries carrying the `encrypted_` token hold GPG ciphertext
//! instead of plaintext. Encryption happens once at authoring time against
//! a fixed recipient key recorded in the configuration file; decryption
//! happens at plan time on the machine that owns the matching private key.
//! Plaintext only ever exists transiently in memory. It is never written
//! back into the source tree and never logged.
//!
//! The [`Vault`] trait is the seam: production code talks to the `gpg`
//! binary through [`GpgVault`], while tests substitute an in-memory fake
//! with a known key pair.

use std::{
    io::Write,
    process::{Command, Stdio},
};

use tracing::{debug, instrument};

/// Layer of indirection for encryption and decryption.
pub trait Vault {
    /// Encrypt plaintext for the configured recipient.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt ciphertext with whatever private key the keyring holds.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Vault backed by the system `gpg` binary.
#[derive(Clone, Debug, Default)]
pub struct GpgVault {
    recipient: Option<String>,
}

impl GpgVault {
    /// Construct new vault for a recipient key identifier.
    ///
    /// The recipient is only needed for encryption; decryption resolves the
    /// key from the ciphertext itself.
    pub fn new(recipient: Option<String>) -> Self {
        Self { recipient }
    }

    /// Verify the `gpg` binary is reachable.
    ///
    /// Called once before planning when the source tree contains encrypted
    /// entries, so a missing tool aborts the run instead of failing every
    /// entry one by one.
    ///
    /// # Errors
    ///
    /// - Return [`VaultError::MissingTool`] if `gpg` cannot be executed.
    #[instrument(level = "debug")]
    pub fn probe() -> Result<()> {
        let status = Command::new("gpg")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| VaultError::MissingTool { source: err })?;

        if !status.success() {
            return Err(VaultError::MissingTool {
                source: std::io::Error::other("gpg --version reported failure"),
            });
        }

        Ok(())
    }
}

impl Vault for GpgVault {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipient = self.recipient.as_deref().ok_or(VaultError::NoRecipient)?;
        debug!("encrypt {} bytes for recipient {recipient}", plaintext.len());

        syscall_piped(
            "gpg",
            [
                "--quiet",
                "--batch",
                "--yes",
                "--encrypt",
                "--recipient",
                recipient,
                "--output",
                "-",
            ],
            plaintext,
        )
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        debug!("decrypt {} bytes", ciphertext.len());

        syscall_piped(
            "gpg",
            ["--quiet", "--batch", "--decrypt"],
            ciphertext,
        )
    }
}

/// Run a command with bytes piped through stdin, collecting stdout.
///
/// Stderr is folded into the error on failure, with trailing newlines
/// chomped. Stdout is returned raw since ciphertext is binary.
fn syscall_piped(
    cmd: &str,
    args: impl IntoIterator<Item = impl AsRef<std::ffi::OsStr>>,
    input: &[u8],
) -> Result<Vec<u8>> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(VaultError::Syscall)?;

    child
        .stdin
        .take()
        .ok_or_else(|| VaultError::Syscall(std::io::Error::other("child stdin unavailable")))?
        .write_all(input)
        .map_err(VaultError::Syscall)?;

    let output = child.wait_with_output().map_err(VaultError::Syscall)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // INVARIANT: Chomp trailing newlines.
        let message = stderr
            .strip_suffix("\r\n")
            .or(stderr.strip_suffix('\n'))
            .map(ToString::to_string)
            .unwrap_or(stderr);

        return Err(VaultError::Gpg { message });
    }

    Ok(output.stdout)
}

/// Encryption layer error types.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The `gpg` binary is missing or broken.
    #[error("gpg binary is unavailable")]
    MissingTool { source: std::io::Error },

    /// Encryption requested without a configured recipient.
    #[error("no encryption recipient configured")]
    NoRecipient,

    /// The `gpg` binary reported failure.
    #[error("gpg failed:\n{message}")]
    Gpg { message: String },

    /// Spawning or talking to the child process failed.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),
}

/// Friendly result alias :3
type Result<T, E = VaultError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod fake {
    use super::{Result, Vault, VaultError};

    /// In-memory vault with a degenerate "key pair" for tests.
    ///
    /// Ciphertext is the plaintext behind a marker header. Close enough to
    /// exercise every decrypt path without a keyring; anything missing the
    /// marker decrypts like ciphertext for a key we do not hold.
    pub(crate) struct FakeVault;

    pub(crate) const MARKER: &[u8] = b"FAKEVAULT\x00";

    impl FakeVault {
        pub(crate) fn new() -> Self {
            Self
        }

        pub(crate) fn seal(plaintext: &[u8]) -> Vec<u8> {
            let mut blob = MARKER.to_vec();
            blob.extend_from_slice(plaintext);
            blob
        }
    }

    impl Vault for FakeVault {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(Self::seal(plaintext))
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            ciphertext
                .strip_prefix(MARKER)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| VaultError::Gpg {
                    message: "decryption failed: not a FakeVault blob".to_string(),
                })
        }
    }
}
