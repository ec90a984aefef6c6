//! Encrypted secrets vault.
//!
//! A single JSON file of AES-256-GCM records, one per named secret. The
//! master key is derived per call via PBKDF2-HMAC-SHA-256 from a
//! caller-supplied passphrase; the vault never retains the passphrase and
//! never caches plaintext. Writes are serialized at the file level and
//! performed atomically (write tmp, rename).

use std::path::{Path, PathBuf};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use warden_domain::error::{Error, Result};

/// AES-256-GCM with the vault's 16-byte IV wire format.
type VaultCipher = AesGcm<Aes256, U16>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretRecord {
    name: String,
    /// Ciphertext without the authentication tag, hex-encoded.
    encrypted_value: String,
    iv: String,
    auth_tag: String,
    salt: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultFile {
    secrets: Vec<SecretRecord>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SecretsVault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SecretsVault {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SecretsVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypt and store a secret, replacing any entry with the same name.
    pub fn store(&self, passphrase: &str, name: &str, value: &str) -> Result<()> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);

        let key = derive_key(passphrase, &salt);
        let cipher = VaultCipher::new_from_slice(&key)
            .map_err(|e| Error::Vault(format!("cipher init: {e}")))?;
        let sealed = cipher
            .encrypt(
                GenericArray::from_slice(&iv),
                Payload {
                    msg: value.as_bytes(),
                    aad: &[],
                },
            )
            .map_err(|_| Error::Vault("encryption failed".into()))?;

        // The AEAD output carries the tag appended; the wire format keeps
        // it in a separate field.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let record = SecretRecord {
            name: name.to_owned(),
            encrypted_value: hex::encode(ciphertext),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
            salt: hex::encode(salt),
        };

        let _guard = self.write_lock.lock();
        let mut file = self.load()?;
        file.secrets.retain(|s| s.name != name);
        file.secrets.push(record);
        self.persist(&file)
    }

    /// Decrypt and return a secret. Plaintext is returned directly and
    /// never cached.
    pub fn get(&self, passphrase: &str, name: &str) -> Result<String> {
        let file = self.load()?;
        let record = file
            .secrets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::Vault(format!("no secret named '{name}'")))?;

        let salt = decode_field(&record.salt, "salt")?;
        let iv = decode_field(&record.iv, "iv")?;
        let ciphertext = decode_field(&record.encrypted_value, "encryptedValue")?;
        let tag = decode_field(&record.auth_tag, "authTag")?;

        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(Error::Vault("malformed secret record".into()));
        }

        let key = derive_key(passphrase, &salt);
        let cipher = VaultCipher::new_from_slice(&key)
            .map_err(|e| Error::Vault(format!("cipher init: {e}")))?;

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(
                GenericArray::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: &[],
                },
            )
            .map_err(|_| Error::Vault("decryption failed (bad passphrase or tampered data)".into()))?;

        String::from_utf8(plaintext).map_err(|_| Error::Vault("secret is not valid UTF-8".into()))
    }

    /// Remove a secret. Deleting a nonexistent name is a no-op.
    pub fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load()?;
        file.secrets.retain(|s| s.name != name);
        self.persist(&file)
    }

    /// Names only; values stay sealed.
    pub fn list_names(&self) -> Result<Vec<String>> {
        let file = self.load()?;
        let mut names: Vec<String> = file.secrets.iter().map(|s| s.name.clone()).collect();
        names.sort();
        Ok(names)
    }

    // ── Private ──────────────────────────────────────────────────────

    fn load(&self) -> Result<VaultFile> {
        if !self.path.exists() {
            return Ok(VaultFile::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|e| Error::Vault(format!("unreadable vault file: {e}")))
    }

    fn persist(&self, file: &VaultFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| Error::Vault(format!("invalid hex in '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_in(dir: &tempfile::TempDir) -> SecretsVault {
        SecretsVault::new(dir.path().join("secrets.enc"))
    }

    #[test]
    fn round_trip_returns_original_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("passphrase", "api-key", "sk-test-value").unwrap();
        assert_eq!(vault.get("passphrase", "api-key").unwrap(), "sk-test-value");
    }

    #[test]
    fn store_with_same_name_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("p", "k", "first").unwrap();
        vault.store("p", "k", "second").unwrap();
        assert_eq!(vault.get("p", "k").unwrap(), "second");
        assert_eq!(vault.list_names().unwrap(), vec!["k"]);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("right", "k", "v").unwrap();
        let err = vault.get("wrong", "k").unwrap_err();
        assert!(err.to_string().contains("invalid secret"));
    }

    #[test]
    fn truncated_auth_tag_fails_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("p", "k", "v").unwrap();

        let path = dir.path().join("secrets.enc");
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let tag = parsed["secrets"][0]["authTag"].as_str().unwrap().to_string();
        parsed["secrets"][0]["authTag"] = serde_json::json!(&tag[..tag.len() - 2]);
        std::fs::write(&path, parsed.to_string()).unwrap();

        assert!(vault.get("p", "k").is_err());
        assert!(vault.get("p", "k").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("p", "k", "sensitive").unwrap();

        let path = dir.path().join("secrets.enc");
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let ct = parsed["secrets"][0]["encryptedValue"]
            .as_str()
            .unwrap()
            .to_string();
        let flipped = if ct.starts_with('0') {
            format!("1{}", &ct[1..])
        } else {
            format!("0{}", &ct[1..])
        };
        parsed["secrets"][0]["encryptedValue"] = serde_json::json!(flipped);
        std::fs::write(&path, parsed.to_string()).unwrap();

        assert!(vault.get("p", "k").is_err());
    }

    #[test]
    fn delete_removes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("p", "a", "1").unwrap();
        vault.store("p", "b", "2").unwrap();

        vault.delete("a").unwrap();
        assert_eq!(vault.list_names().unwrap(), vec!["b"]);
        // Deleting again is a no-op.
        vault.delete("a").unwrap();
        assert_eq!(vault.list_names().unwrap(), vec!["b"]);
    }

    #[test]
    fn list_names_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        assert!(vault.list_names().unwrap().is_empty());
    }

    #[test]
    fn wire_format_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.store("p", "k", "v").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("secrets.enc")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let record = &parsed["secrets"][0];
        assert_eq!(record["name"], "k");
        assert_eq!(record["salt"].as_str().unwrap().len(), SALT_LEN * 2);
        assert_eq!(record["iv"].as_str().unwrap().len(), IV_LEN * 2);
        assert_eq!(record["authTag"].as_str().unwrap().len(), TAG_LEN * 2);
    }
}
