//! Content digests identifying blobs.

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{RegistryError, RegistryErrorKind};

const SHA256: &str = "sha256";
const SHA256_HEX_LEN: usize = 64;

/// A content digest of the form `sha256:<64 lowercase hex characters>`.
///
/// Digests are the unit of identity for blobs: two registries holding a blob
/// with the same digest hold the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Digest `data` with SHA-256.
    pub fn sha256(data: &[u8]) -> Self {
        Digest(format!("{SHA256}:{}", hex::encode(Sha256::digest(data))))
    }

    /// The algorithm half, e.g. `sha256`.
    pub fn algorithm(&self) -> &str {
        self.split().0
    }

    /// The hex encoded half.
    pub fn encoded(&self) -> &str {
        self.split().1
    }

    /// The full `algorithm:hex` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative storage path for this digest, `<algorithm>/<hex>`.
    pub fn path(&self) -> Utf8PathBuf {
        let (algorithm, encoded) = self.split();
        Utf8PathBuf::from(algorithm).join(encoded)
    }

    fn split(&self) -> (&str, &str) {
        // Validated on construction.
        self.0.split_once(':').unwrap_or((SHA256, &self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::new(RegistryErrorKind::InvalidDigest, s);

        let (algorithm, encoded) = s.split_once(':').ok_or_else(invalid)?;
        if algorithm != SHA256 || encoded.len() != SHA256_HEX_LEN {
            return Err(invalid());
        }
        if !encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid());
        }

        Ok(Digest(s.to_owned()))
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
