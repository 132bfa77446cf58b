//! Versioned, checksummed envelopes for persisted artifacts.
//!
//! Every model, transformer, and dataframe is stored as one JSON envelope under
//! its `(kind, name)` key. The envelope records which kind (and, for
//! composites, which wrapped model) wrote it, so a load that asks for a
//! different type fails with `TypeMismatch` instead of deserializing garbage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tessera_core::{Configuration, StorageKey};

use crate::error::MlError;

/// Envelope layout version written by this build.
pub const FORMAT_VERSION: u32 = 1;

/// On-disk representation of a persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    pub kind: String,
    /// Concrete type under `kind`; equal to `kind` except for composites.
    pub variant: String,
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    /// SHA-256 over the serialized parameters and payload.
    pub checksum: String,
    pub parameters: serde_json::Value,
    pub payload: serde_json::Value,
}

impl ArtifactEnvelope {
    /// Serialize parameters and payload and stamp them with a checksum.
    pub fn seal(
        kind: &str,
        variant: &str,
        parameters: &impl Serialize,
        payload: &impl Serialize,
    ) -> Result<Self, MlError> {
        let parameters = serde_json::to_value(parameters)?;
        let payload = serde_json::to_value(payload)?;
        let checksum = checksum(&parameters, &payload)?;
        Ok(Self {
            kind: kind.to_string(),
            variant: variant.to_string(),
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            checksum,
            parameters,
            payload,
        })
    }

    fn verify(&self, key: &StorageKey, variant: &str) -> Result<(), MlError> {
        if self.kind != key.kind() || self.variant != variant {
            return Err(MlError::TypeMismatch {
                name: key.name().to_string(),
                requested: describe(key.kind(), variant),
                found: describe(&self.kind, &self.variant),
            });
        }
        if self.format_version != FORMAT_VERSION {
            return Err(corrupt(
                key,
                format!(
                    "format version {} is not supported (expected {FORMAT_VERSION})",
                    self.format_version
                ),
            ));
        }
        if checksum(&self.parameters, &self.payload)? != self.checksum {
            return Err(corrupt(key, "checksum mismatch"));
        }
        Ok(())
    }
}

fn checksum(
    parameters: &serde_json::Value,
    payload: &serde_json::Value,
) -> Result<String, MlError> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(parameters)?);
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(payload)?);
    Ok(format!("{:x}", hasher.finalize()))
}

fn describe(kind: &str, variant: &str) -> String {
    if kind == variant {
        kind.to_string()
    } else {
        format!("{kind} of {variant}")
    }
}

fn corrupt(key: &StorageKey, reason: impl Into<String>) -> MlError {
    MlError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Persist `parameters` and `payload` under `(kind, name)`, replacing any previous value.
pub(crate) fn store(
    config: &Configuration,
    kind: &str,
    variant: &str,
    name: &str,
    parameters: &impl Serialize,
    payload: &impl Serialize,
) -> Result<(), MlError> {
    let key = StorageKey::new(kind, name)?;
    let envelope = ArtifactEnvelope::seal(kind, variant, parameters, payload)?;
    config.store().put(&key, &serde_json::to_vec(&envelope)?)?;
    tracing::debug!(%key, checksum = %envelope.checksum, "Saved artifact");
    Ok(())
}

fn read_envelope(config: &Configuration, key: &StorageKey) -> Result<ArtifactEnvelope, MlError> {
    let bytes = config.store().get(key)?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(key, e.to_string()))
}

/// Load and verify the envelope under `(kind, name)`, which must hold `variant`.
pub(crate) fn fetch<Pa, Pl>(
    config: &Configuration,
    kind: &str,
    variant: &str,
    name: &str,
) -> Result<(Pa, Pl), MlError>
where
    Pa: DeserializeOwned,
    Pl: DeserializeOwned,
{
    let key = StorageKey::new(kind, name)?;
    let envelope = read_envelope(config, &key)?;
    envelope.verify(&key, variant)?;

    let parameters =
        serde_json::from_value(envelope.parameters).map_err(|e| corrupt(&key, e.to_string()))?;
    let payload =
        serde_json::from_value(envelope.payload).map_err(|e| corrupt(&key, e.to_string()))?;
    tracing::debug!(%key, saved_at = %envelope.saved_at, "Loaded artifact");
    Ok((parameters, payload))
}

/// Variant recorded in the envelope under `(kind, name)`.
pub(crate) fn stored_variant(config: &Configuration, kind: &str, name: &str) -> Result<String, MlError> {
    let key = StorageKey::new(kind, name)?;
    Ok(read_envelope(config, &key)?.variant)
}

/// Remove the envelope under `(kind, name)`.
pub(crate) fn remove(config: &Configuration, kind: &str, name: &str) -> Result<(), MlError> {
    let key = StorageKey::new(kind, name)?;
    config.store().delete(&key)?;
    tracing::debug!(%key, "Deleted artifact");
    Ok(())
}
