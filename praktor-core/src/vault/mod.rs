//! Secret vault: AEAD-at-rest, reference resolution at container
//! start, and output redaction. Decryption never touches a model prompt —
//! only container env/file mounts and the orchestrator's own redaction pass
//! ever see plaintext.

mod error;

pub use error::VaultError;

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::password_hash::SaltString;
use argon2::Argon2;
use rand::RngCore;
use serde_json::Value;

use praktor_persistence::{SecretKind, SecretRow, Store};

/// Domain-separation salt for key derivation. The vault has exactly one key
/// per process (derived once from the configured passphrase), so a fixed
/// salt is sufficient — it is not protecting against rainbow tables across
/// independent deployments, only binding the derivation to this project.
const KEY_SALT: &str = "praktor-vault-v1-static-salt";

const NONCE_LEN: usize = 12;

/// Minimum plaintext length eligible for output redaction — shorter secrets are skipped to avoid false positives.
const MIN_REDACTABLE_LEN: usize = 8;

const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

pub struct Vault {
    store: Store,
    key: Option<[u8; 32]>,
    plaintext_cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl Vault {
    /// `passphrase = None` leaves the vault unkeyed: reads/writes fail with
    /// `KeyNotReady` until a passphrase is configured (restart required to change it).
    pub fn new(store: Store, passphrase: Option<&str>) -> Result<Self, VaultError> {
        let key = match passphrase {
            Some(p) => Some(derive_key(p)?),
            None => None,
        };
        Ok(Self {
            store,
            key,
            plaintext_cache: Mutex::new(HashMap::new()),
        })
    }

    fn key(&self) -> Result<&[u8; 32], VaultError> {
        self.key.as_ref().ok_or(VaultError::KeyNotReady)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), VaultError> {
        let key = self.key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, VaultError> {
        let key = self.key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let nonce = Nonce::from_slice(nonce);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptFailed("aead verification failed".into()))
    }

    pub async fn set_secret(
        &self,
        id: &str,
        description: &str,
        kind: SecretKind,
        filename: Option<&str>,
        plaintext: &[u8],
        global: bool,
    ) -> Result<(), VaultError> {
        let (ciphertext, nonce) = self.encrypt(plaintext)?;
        self.store
            .upsert_secret(id, description, kind, filename, &ciphertext, &nonce, global)
            .await?;
        self.plaintext_cache.lock().unwrap().remove(id);
        Ok(())
    }

    pub async fn delete_secret(&self, id: &str) -> Result<(), VaultError> {
        self.store.delete_secret(id).await?;
        self.plaintext_cache.lock().unwrap().remove(id);
        Ok(())
    }

    pub async fn list_secrets(&self) -> Result<Vec<SecretRow>, VaultError> {
        Ok(self.store.list_secrets().await?)
    }

    /// Decrypted plaintext for `id` (`vault get`). Exposed separately from
    /// redaction's [`Self::plaintext_for`] since the caller needs the error
    /// surfaced, not silently skipped.
    pub async fn get_secret_plaintext(&self, id: &str) -> Result<Vec<u8>, VaultError> {
        self.plaintext_for(id).await
    }

    pub async fn set_global(&self, id: &str, global: bool) -> Result<(), VaultError> {
        Ok(self.store.set_secret_global(id, global).await?)
    }

    pub async fn assign_secret(&self, secret_id: &str, agent_id: &str) -> Result<(), VaultError> {
        Ok(self.store.assign_secret(secret_id, agent_id).await?)
    }

    pub async fn unassign_secret(&self, secret_id: &str, agent_id: &str) -> Result<(), VaultError> {
        Ok(self.store.unassign_secret(secret_id, agent_id).await?)
    }

    /// Decrypted plaintext for `id`, using the in-process cache so repeated redaction passes don't re-run
    /// Argon2id/AES-GCM on every agent reply.
    async fn plaintext_for(&self, secret_id: &str) -> Result<Vec<u8>, VaultError> {
        if let Some(cached) = self.plaintext_cache.lock().unwrap().get(secret_id).cloned() {
            return Ok(cached);
        }
        let row = self
            .store
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| VaultError::SecretNotFound(secret_id.to_string()))?;
        let plaintext = self.decrypt(&row.ciphertext, &row.nonce)?;
        self.plaintext_cache
            .lock()
            .unwrap()
            .insert(secret_id.to_string(), plaintext.clone());
        Ok(plaintext)
    }

    /// Resolves `secret:<name>` references in an env map. Failing
    /// references are dropped with the caller expected to log a warning —
    /// the container still starts.
    pub async fn resolve_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut resolved = HashMap::with_capacity(env.len());
        for (k, v) in env {
            match strip_secret_ref(v) {
                Some(name) => match self.plaintext_for(name).await {
                    Ok(plaintext) => {
                        resolved.insert(k.clone(), String::from_utf8_lossy(&plaintext).into_owned());
                    }
                    Err(_) => continue,
                },
                None => {
                    resolved.insert(k.clone(), v.clone());
                }
            }
        }
        resolved
    }

    /// Resolves a `secret:<name>` reference directly to plaintext bytes, for
    /// file mounts. Returns `None` if resolution fails — the file
    /// mount is skipped, the container still starts.
    pub async fn resolve_reference(&self, reference: &str) -> Option<Vec<u8>> {
        let name = strip_secret_ref(reference)?;
        self.plaintext_for(name).await.ok()
    }

    /// Walks a JSON value (the extensions blob) and resolves any
    /// `secret:<name>` string leaves in place, dropping the key when
    /// resolution fails.
    pub async fn resolve_json_refs(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if let Some(name) = strip_secret_ref(s) {
                    if let Ok(plaintext) = self.plaintext_for(name).await {
                        *s = String::from_utf8_lossy(&plaintext).into_owned();
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    Box::pin(self.resolve_json_refs(item)).await;
                }
            }
            Value::Object(map) => {
                for (_, v) in map.iter_mut() {
                    Box::pin(self.resolve_json_refs(v)).await;
                }
            }
            _ => {}
        }
    }

    /// Redacts every secret accessible to `agent_id` that appears verbatim
    /// in `text`. Secrets under
    /// [`MIN_REDACTABLE_LEN`] bytes are skipped.
    pub async fn redact(&self, agent_id: &str, text: &str) -> Result<String, VaultError> {
        let secrets = self.store.secrets_for_agent(agent_id).await?;
        let mut out = text.to_string();
        for secret in secrets {
            let plaintext = match self.plaintext_for(&secret.id).await {
                Ok(p) => p,
                Err(_) => continue,
            };
            if plaintext.len() < MIN_REDACTABLE_LEN {
                continue;
            }
            if let Ok(plaintext_str) = std::str::from_utf8(&plaintext) {
                if !plaintext_str.is_empty() && out.contains(plaintext_str) {
                    out = out.replace(plaintext_str, REDACTION_PLACEHOLDER);
                }
            }
        }
        Ok(out)
    }
}

fn strip_secret_ref(value: &str) -> Option<&str> {
    value.strip_prefix("secret:")
}

fn derive_key(passphrase: &str) -> Result<[u8; 32], VaultError> {
    let salt = SaltString::encode_b64(KEY_SALT.as_bytes())
        .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;
    let argon2 = Argon2::default();
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt.as_str().as_bytes(), &mut key)
        .map_err(|e| VaultError::EncryptFailed(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn vault() -> Vault {
        let store = Store::open_in_memory().unwrap();
        Vault::new(store, Some("correct horse battery staple")).unwrap()
    }

    #[tokio::test]
    async fn decrypt_encrypt_round_trips_including_empty() {
        let v = vault().await;
        for plaintext in [&b""[..], b"short", b"a much longer secret value here"] {
            let (ct, nonce) = v.encrypt(plaintext).unwrap();
            let back = v.decrypt(&ct, &nonce).unwrap();
            assert_eq!(back, plaintext);
        }
    }

    #[tokio::test]
    async fn unkeyed_vault_returns_key_not_ready() {
        let store = Store::open_in_memory().unwrap();
        let v = Vault::new(store, None).unwrap();
        assert!(matches!(v.encrypt(b"x"), Err(VaultError::KeyNotReady)));
    }

    #[tokio::test]
    async fn resolve_env_drops_unresolvable_reference_but_keeps_plain_values() {
        let v = vault().await;
        let mut env = HashMap::new();
        env.insert("PLAIN".to_string(), "value".to_string());
        env.insert("MISSING".to_string(), "secret:does-not-exist".to_string());
        let resolved = v.resolve_env(&env).await;
        assert_eq!(resolved.get("PLAIN"), Some(&"value".to_string()));
        assert!(!resolved.contains_key("MISSING"));
    }

    #[tokio::test]
    async fn resolve_env_substitutes_known_secret() {
        let v = vault().await;
        v.set_secret("github-token", "", SecretKind::String, None, b"ghp_abcdef123456", false)
            .await
            .unwrap();
        let mut env = HashMap::new();
        env.insert("GITHUB_TOKEN".to_string(), "secret:github-token".to_string());
        let resolved = v.resolve_env(&env).await;
        assert_eq!(resolved.get("GITHUB_TOKEN"), Some(&"ghp_abcdef123456".to_string()));
    }

    #[tokio::test]
    async fn redact_replaces_verbatim_secret_in_output() {
        let v = vault().await;
        v.set_secret("api", "", SecretKind::String, None, b"abcdefgh12345678", true)
            .await
            .unwrap();
        v.store
            .upsert_agent(&praktor_persistence::AgentRow {
                id: "coder".into(),
                display_name: "coder".into(),
                description: String::new(),
                model: None,
                image: None,
                workspace: "coder-ws".into(),
                env: HashMap::new(),
                allowed_tools: vec![],
                files: vec![],
                nix_enabled: false,
            })
            .await
            .unwrap();
        let redacted = v
            .redact("coder", "Here is your key: abcdefgh12345678")
            .await
            .unwrap();
        assert_eq!(redacted, "Here is your key: [REDACTED]");
    }

    #[tokio::test]
    async fn redact_skips_secrets_shorter_than_minimum_length() {
        let v = vault().await;
        v.set_secret("short", "", SecretKind::String, None, b"abc", true)
            .await
            .unwrap();
        v.store
            .upsert_agent(&praktor_persistence::AgentRow {
                id: "coder".into(),
                display_name: "coder".into(),
                description: String::new(),
                model: None,
                image: None,
                workspace: "coder-ws".into(),
                env: HashMap::new(),
                allowed_tools: vec![],
                files: vec![],
                nix_enabled: false,
            })
            .await
            .unwrap();
        let redacted = v.redact("coder", "the value is abc here").await.unwrap();
        assert_eq!(redacted, "the value is abc here");
    }
}
