//! Symmetric-cipher stage of the export pipeline.
//!
//! Archives are written by `openssl enc`. The parameters below determine
//! the on-disk format and must not change, or previously uploaded ranges
//! can no longer be decrypted.

use crate::command::CommandSpec;

pub const CIPHER_PROGRAM: &str = "openssl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherParams {
    pub cipher: &'static str,
    pub digest: &'static str,
    pub iterations: u32,
}

/// AES-256-CBC, SHA-512 digest, PBKDF2 with 250000 iterations. The salt is
/// generated by openssl and stored in the stream header.
pub const ARCHIVE_CIPHER: CipherParams = CipherParams {
    cipher: "aes-256-cbc",
    digest: "sha512",
    iterations: 250_000,
};

impl CipherParams {
    fn base(&self) -> CommandSpec {
        CommandSpec::new(CIPHER_PROGRAM)
            .arg("enc")
            .arg(format!("-{}", self.cipher))
    }

    fn kdf(&self, cmd: CommandSpec, passphrase: &str) -> CommandSpec {
        cmd.args(["-md", self.digest, "-pbkdf2", "-iter"])
            .arg(self.iterations.to_string())
            .arg("-pass")
            .secret_arg(format!("pass:{}", passphrase))
    }

    /// Reads plaintext on stdin, writes ciphertext on stdout.
    pub fn encrypt_command(&self, passphrase: &str) -> CommandSpec {
        self.kdf(self.base(), passphrase)
    }

    /// Inverse of [`encrypt_command`](Self::encrypt_command).
    pub fn decrypt_command(&self, passphrase: &str) -> CommandSpec {
        self.kdf(self.base().arg("-d"), passphrase)
    }
}
