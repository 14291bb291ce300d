use crate::types::DataSourceId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};

/// Identity of a cache entry or an in-flight job: SHA-256 over the data
/// source id and the effective query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(data_source_id: DataSourceId, query_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data_source_id.0.to_be_bytes());
        hasher.update([0u8]);
        hasher.update(query_text.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
