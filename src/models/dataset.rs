use serde::{Deserialize, Serialize};

use crate::error::UsageError;

/// Opaque backend reference to a registered, storage-backed dataset.
///
/// Treated as an immutable foreign key once obtained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(raw: impl Into<String>) -> Result<Self, UsageError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        match super::identifier_problem(trimmed) {
            Some(reason) => Err(UsageError::InvalidDatasetId(format!("{trimmed:?} {reason}"))),
            None => Ok(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DatasetId {
    type Error = UsageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatasetId> for String {
    fn from(id: DatasetId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_id_trims_and_rejects_blank() {
        assert_eq!(DatasetId::new(" ds_123 ").unwrap().as_str(), "ds_123");
        assert!(DatasetId::new("   ").is_err());
    }

    #[test]
    fn test_dataset_id_rejects_url_syntax() {
        for raw in ["..", ".", "ds/1", "ds?x=1", "ds#frag", "ds 1"] {
            assert!(
                matches!(DatasetId::new(raw), Err(UsageError::InvalidDatasetId(_))),
                "{raw:?} should be rejected"
            );
        }
        assert!(serde_json::from_str::<DatasetId>("\"..\"").is_err());
    }

    #[test]
    fn test_dataset_id_deserializes_with_validation() {
        let id: DatasetId = serde_json::from_str("\"ds_9\"").unwrap();
        assert_eq!(id.to_string(), "ds_9");
        assert!(serde_json::from_str::<DatasetId>("\"\"").is_err());
    }
}
