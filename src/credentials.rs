//! Secure credential storage using AES-256-GCM encryption.
//!
//! Credentials (username + password) are encrypted and stored beside the
//! process's config directory, alongside a persisted random key file rather
//! than a key re-derived from environment variables on every run.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Encrypted credentials for a service.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedCredentials {
    username: String,
    password: String,
}

/// Stores credentials securely (both username and password encrypted) in
/// `config_dir`.
///
/// # Arguments
/// * `config_dir` - The process's config directory (see `crate::config`)
/// * `key` - Unique key for this credential (e.g. a subscription's source
///   URL or a node source id)
/// * `username` - The username to store
/// * `password` - The password to store
pub fn store_credentials(config_dir: &Path, key: &str, username: &str, password: &str) -> Result<(), String> {
    let path = credentials_file(config_dir);

    let mut creds: HashMap<String, String> = if path.exists() {
        let content = fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        HashMap::new()
    };

    let credentials = EncryptedCredentials {
        username: username.to_string(),
        password: password.to_string(),
    };
    let plaintext = serde_json::to_string(&credentials).map_err(|e| e.to_string())?;

    let encryption_key = load_or_create_key(config_dir)?;
    let cipher = Aes256Gcm::new_from_slice(&encryption_key).map_err(|e| e.to_string())?;
    let nonce = random_nonce();

    let encrypted = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| format!("encryption failed: {e}"))?;

    let mut envelope = Vec::with_capacity(12 + encrypted.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&encrypted);
    creds.insert(key.to_string(), BASE64.encode(envelope));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    let content = serde_json::to_string(&creds).map_err(|e| e.to_string())?;
    fs::write(&path, &content).map_err(|e| e.to_string())?;
    set_owner_only(&path);

    debug!("stored encrypted credentials for: {key}");
    Ok(())
}

/// Retrieves credentials (decrypted username and password) for `key`.
#[must_use]
pub fn get_credentials(config_dir: &Path, key: &str) -> Option<(String, String)> {
    let path = credentials_file(config_dir);
    if !path.exists() {
        return None;
    }

    let content = fs::read_to_string(&path).ok()?;
    let creds: HashMap<String, String> = serde_json::from_str(&content).ok()?;

    let envelope = BASE64.decode(creds.get(key)?).ok()?;
    if envelope.len() < 12 {
        return None;
    }
    let (nonce, ciphertext) = envelope.split_at(12);

    let encryption_key = load_or_create_key(config_dir).ok()?;
    let cipher = Aes256Gcm::new_from_slice(&encryption_key).ok()?;

    let decrypted = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()?;
    let plaintext = String::from_utf8(decrypted).ok()?;
    let credentials: EncryptedCredentials = serde_json::from_str(&plaintext).ok()?;

    debug!("retrieved encrypted credentials for: {key}");
    Some((credentials.username, credentials.password))
}

/// Deletes stored credentials for `key`. Not an error if none exist.
pub fn delete_credentials(config_dir: &Path, key: &str) -> Result<(), String> {
    let path = credentials_file(config_dir);
    if !path.exists() {
        return Ok(());
    }

    let content = fs::read_to_string(&path).map_err(|e| e.to_string())?;
    let mut creds: HashMap<String, String> = serde_json::from_str(&content).unwrap_or_default();

    creds.remove(key);

    let content = serde_json::to_string(&creds).map_err(|e| e.to_string())?;
    fs::write(&path, &content).map_err(|e| e.to_string())?;

    Ok(())
}

fn credentials_file(config_dir: &Path) -> PathBuf {
    config_dir.join(".credentials")
}

fn key_file(config_dir: &Path) -> PathBuf {
    config_dir.join("credentials.key")
}

/// Loads the per-profile encryption key, generating and persisting a fresh
/// random 32-byte key on first use rather than deriving one from
/// environment variables.
fn load_or_create_key(config_dir: &Path) -> Result<[u8; 32], String> {
    let path = key_file(config_dir);
    if let Ok(existing) = fs::read(&path)
        && existing.len() == 32
    {
        let mut key = [0u8; 32];
        key.copy_from_slice(&existing);
        return Ok(key);
    }

    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(&path, key).map_err(|e| e.to_string())?;
    set_owner_only(&path);
    Ok(key)
}

fn random_nonce() -> [u8; 12] {
    use rand::RngCore;
    let mut nonce = [0u8; 12];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn set_owner_only(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("feedcore-creds-test-{label}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_credentials_roundtrip() {
        let dir = tmp_dir("roundtrip");
        let key = "test_creds_key";
        let username = "test_user";
        let password = "test_password_123!@#";

        store_credentials(&dir, key, username, password).expect("store failed");
        let retrieved = get_credentials(&dir, key);
        assert_eq!(retrieved, Some((username.to_string(), password.to_string())));

        let _ = delete_credentials(&dir, key);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_key_persisted_across_calls() {
        let dir = tmp_dir("key-persist");
        let key1 = load_or_create_key(&dir).unwrap();
        let key2 = load_or_create_key(&dir).unwrap();
        assert_eq!(key1, key2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_keys_differ_across_profiles() {
        let dir_a = tmp_dir("profile-a");
        let dir_b = tmp_dir("profile-b");
        assert_ne!(load_or_create_key(&dir_a).unwrap(), load_or_create_key(&dir_b).unwrap());
        let _ = fs::remove_dir_all(&dir_a);
        let _ = fs::remove_dir_all(&dir_b);
    }

    #[test]
    fn test_delete_removes_entry() {
        let dir = tmp_dir("delete");
        store_credentials(&dir, "k", "u", "p").unwrap();
        delete_credentials(&dir, "k").unwrap();
        assert!(get_credentials(&dir, "k").is_none());
        let _ = fs::remove_dir_all(&dir);
    }
}
