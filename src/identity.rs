//! Identity record model
//!
//! An identity record is the canonical per-account document. Only the fields
//! the store indexes on are typed; everything else is carried through
//! untouched in `extra`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{Result, StoreError};

/// Account identifier type
pub type AccountId = String;

/// Access key identifier type
pub type AccessKeyId = String;

/// Lifecycle state of a credential
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessKeyStatus {
    #[default]
    Active,
    Inactive,
}

/// A single credential owned by an account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessKey {
    #[serde(alias = "access_key")]
    pub access_key_id: AccessKeyId,
    /// Secret material, `None` when the record was read redacted
    #[serde(alias = "secret_key", default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub status: AccessKeyStatus,
}

/// Canonical account record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityRecord {
    #[serde(alias = "_id")]
    pub account_id: AccountId,
    #[serde(alias = "name")]
    pub account_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub access_keys: Vec<AccessKey>,
    /// Account configuration this store does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdentityRecord {
    /// Parse a record, keeping secret material
    pub fn from_slice(path: &Path, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::InvalidRecord {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a record, optionally dropping secret material
    pub fn parse(path: &Path, bytes: &[u8], show_secrets: bool) -> Result<Self> {
        let record = Self::from_slice(path, bytes)?;
        Ok(if show_secrets { record } else { record.redacted() })
    }

    /// Copy of this record with every secret removed
    pub fn redacted(mut self) -> Self {
        for key in &mut self.access_keys {
            key.secret = None;
        }
        self
    }

    pub fn access_key_ids(&self) -> impl Iterator<Item = &str> {
        self.access_keys.iter().map(|k| k.access_key_id.as_str())
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|source| StoreError::InvalidRecord {
            path: Path::new(&self.account_id).to_path_buf(),
            source,
        })
    }
}

/// Legacy records may carry `"access_keys": null`
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<AccessKey>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<AccessKey>>::deserialize(deserializer)?.unwrap_or_default())
}
