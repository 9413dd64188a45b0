//! [`KeyStore`] backed by the local GnuPG public keyring.
//!
//! Keys are listed through `gpg --with-colons` and exported with
//! `gpg --armor --export`. Each call spawns `gpg` and waits for it.

use std::path::PathBuf;
use std::process::{Command, Output};

use tracing::debug;

use crate::error::{Error, Result};
use crate::keystore::{Algorithm, KeyRecord, KeyStore, Signature, Subkey, UserId};

/// How to invoke GnuPG.
#[derive(Debug, Clone)]
pub struct GpgConfig {
    /// The `gpg` executable.
    pub program: PathBuf,
    /// Alternative GnuPG home directory (`--homedir`).
    pub homedir: Option<PathBuf>,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gpg"),
            homedir: None,
        }
    }
}

/// Key store reading the public keyring with the `gpg` command line tool.
#[derive(Debug, Clone, Default)]
pub struct GpgKeyStore {
    config: GpgConfig,
}

impl GpgKeyStore {
    /// Create a store using `config`.
    pub fn new(config: GpgConfig) -> Self {
        Self { config }
    }

    /// Check that `gpg` can be run at all.
    pub fn check(&self) -> Result<()> {
        let output = self.command().arg("--version").output()?;
        if !output.status.success() {
            return Err(Error::keystore(format!(
                "{} --version failed: {}",
                self.config.program.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(["--batch", "--no-tty", "--quiet"]);
        if let Some(homedir) = &self.config.homedir {
            cmd.arg("--homedir").arg(homedir);
        }
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<Output> {
        debug!(?cmd, "running gpg");
        Ok(cmd.output()?)
    }
}

impl KeyStore for GpgKeyStore {
    fn query(&self, pattern: &str, include_signatures: bool) -> Result<Vec<KeyRecord>> {
        let mut cmd = self.command();
        cmd.args(["--with-colons", "--fixed-list-mode", "--with-fingerprint"]);
        cmd.arg(if include_signatures {
            "--list-sigs"
        } else {
            "--list-keys"
        });
        cmd.arg("--").arg(pattern);

        let output = self.run(cmd)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let records = parse_colon_listing(&stdout);

        if !output.status.success() && records.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // gpg exits non-zero when nothing matched.
            if stderr.contains("No public key") || stderr.trim().is_empty() {
                return Ok(Vec::new());
            }
            return Err(Error::keystore(format!(
                "gpg key listing failed: {}",
                stderr.trim()
            )));
        }

        Ok(records)
    }

    fn export_armored(&self, pattern: &str) -> Result<Vec<u8>> {
        let mut cmd = self.command();
        cmd.args(["--armor", "--export", "--"]).arg(pattern);

        let output = self.run(cmd)?;
        if !output.status.success() {
            return Err(Error::keystore(format!(
                "gpg export failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Parse `gpg --with-colons --fixed-list-mode` output into key records.
///
/// Records without a fingerprint or user id are dropped.
pub fn parse_colon_listing(listing: &str) -> Vec<KeyRecord> {
    let mut records = Vec::new();
    let mut current: Option<KeyRecord> = None;
    // Signatures following a `sub` record are binding signatures, not
    // certifications on a user id.
    let mut in_uid = false;

    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        match field(0) {
            "pub" => {
                records.extend(current.take());
                current = Some(KeyRecord {
                    fingerprint: String::new(),
                    subkeys: vec![parse_subkey(&fields)],
                    uids: Vec::new(),
                    revoked: field(1) == "r",
                });
                in_uid = false;
            }
            "sub" => {
                if let Some(record) = current.as_mut() {
                    record.subkeys.push(parse_subkey(&fields));
                }
                in_uid = false;
            }
            "fpr" => {
                if let Some(record) = current.as_mut() {
                    if record.fingerprint.is_empty() && record.subkeys.len() == 1 {
                        record.fingerprint = field(9).to_string();
                    }
                }
            }
            "uid" => {
                if let Some(record) = current.as_mut() {
                    let (name, email) = split_user_id(&decode_field(field(9)));
                    record.uids.push(UserId {
                        name,
                        email,
                        signatures: Vec::new(),
                    });
                    in_uid = true;
                }
            }
            "sig" if in_uid => {
                if let Some(uid) = current.as_mut().and_then(|r| r.uids.last_mut()) {
                    let signer = decode_field(field(9));
                    let (name, email) = if signer.starts_with('[') {
                        (None, None)
                    } else {
                        split_user_id(&signer)
                    };
                    uid.signatures.push(Signature {
                        key_id: field(4).to_string(),
                        name,
                        email,
                    });
                }
            }
            _ => {}
        }
    }
    records.extend(current);

    records
        .into_iter()
        .filter(|r| !r.fingerprint.is_empty() && !r.uids.is_empty())
        .collect()
}

fn parse_subkey(fields: &[&str]) -> Subkey {
    let field = |i: usize| fields.get(i).copied().unwrap_or("");
    Subkey {
        algorithm: field(3)
            .parse()
            .map(Algorithm::from_openpgp_id)
            .unwrap_or(Algorithm::Unknown),
        bits: field(2).parse().unwrap_or(0),
        created: field(5).parse().unwrap_or(0),
    }
}

/// Undo the `\xHH` escaping gpg applies to colon listing fields.
fn decode_field(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(byte) = raw
                .get(i + 2..i + 4)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Split `Name (Comment) <email>` into name and email. The comment is dropped.
fn split_user_id(uid: &str) -> (Option<String>, Option<String>) {
    let uid = uid.trim();
    let (rest, email) = match (uid.rfind('<'), uid.ends_with('>')) {
        (Some(start), true) => (&uid[..start], Some(&uid[start + 1..uid.len() - 1])),
        _ => (uid, None),
    };

    let mut name = rest.trim();
    if name.ends_with(')') {
        if let Some(start) = name.rfind(" (") {
            name = name[..start].trim_end();
        }
    }

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    (non_empty(name), email.and_then(non_empty))
}
