//! Network endpoints and ledger signing key

use super::ConfigError;

use std::fmt;
use std::path::Path;
use url::Url;

/// Ledger RPC endpoint
pub const EVM_RPC_VAR: &str = "evmRpc";
/// Storage-network indexer endpoint
pub const INDEXER_RPC_VAR: &str = "indRpc";
/// Hex-encoded signing key for ledger submissions
pub const PRIVATE_KEY_VAR: &str = "privateKey";

/// 32-byte signing key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Parse from hex, with or without the `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, ConfigError> {
        let digits = s.trim().strip_prefix("0x").unwrap_or(s.trim());
        let mut key = [0u8; 32];
        hex::decode_to_slice(digits, &mut key)
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;

        if key == [0u8; 32] {
            return Err(ConfigError::InvalidKey("key must not be all zeros".into()));
        }
        Ok(Self(key))
    }

    /// Public signer identity derived from the key (20 bytes, `0x` hex)
    pub fn signer_id(&self) -> String {
        let digest = blake3::derive_key("storage-roundtrip signer v1", &self.0);
        format!("0x{}", hex::encode(&digest[12..]))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Validated network settings shared by every orchestrator call
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Ledger endpoint
    pub evm_rpc: Url,

    /// Indexer endpoint used to open storage sessions
    pub indexer_rpc: Url,

    /// Signing key for ledger submissions
    pub private_key: PrivateKey,
}

impl NetworkConfig {
    /// Load from the process environment, letting `./.env` fill unset values
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => tracing::debug!("No .env file found"),
            Err(e) => return Err(ConfigError::EnvFile(e.to_string())),
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an explicit env file, then the process environment
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        dotenvy::from_path(path)
            .map_err(|e| ConfigError::EnvFile(format!("{}: {}", path.display(), e)))?;

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Every missing variable is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let evm_rpc = get(EVM_RPC_VAR);
        let indexer_rpc = get(INDEXER_RPC_VAR);
        let private_key = get(PRIVATE_KEY_VAR);

        let missing: Vec<&'static str> = [
            (EVM_RPC_VAR, evm_rpc.is_none()),
            (INDEXER_RPC_VAR, indexer_rpc.is_none()),
            (PRIVATE_KEY_VAR, private_key.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        match (evm_rpc, indexer_rpc, private_key) {
            (Some(evm_rpc), Some(indexer_rpc), Some(private_key)) => Ok(Self {
                evm_rpc: parse_url(EVM_RPC_VAR, &evm_rpc)?,
                indexer_rpc: parse_url(INDEXER_RPC_VAR, &indexer_rpc)?,
                private_key: PrivateKey::from_hex(&private_key)?,
            }),
            _ => Err(ConfigError::Missing(missing)),
        }
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })
}
