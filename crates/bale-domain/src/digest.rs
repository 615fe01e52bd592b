use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hash algorithms accepted in artifact digests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl DigestAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of the hex-encoded hash.
    #[must_use]
    pub fn encoded_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            other => Err(DigestParseError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DigestParseError {
    #[error("invalid checksum digest format")]
    InvalidFormat,
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("invalid checksum digest length")]
    InvalidLength,
    #[error("invalid checksum digest encoding")]
    InvalidEncoding,
}

/// A validated `algorithm:encoded` content digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    encoded: String,
}

impl Digest {
    /// Build a digest from an algorithm and a hex encoding, validating the encoding.
    pub fn new(algorithm: DigestAlgorithm, encoded: impl Into<String>) -> Result<Self, DigestParseError> {
        let encoded = encoded.into();
        if encoded.len() != algorithm.encoded_len() {
            return Err(DigestParseError::InvalidLength);
        }
        if !encoded
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(DigestParseError::InvalidEncoding);
        }
        Ok(Self { algorithm, encoded })
    }

    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (algorithm, encoded) = value
            .split_once(':')
            .ok_or(DigestParseError::InvalidFormat)?;
        if algorithm.is_empty() || encoded.is_empty() {
            return Err(DigestParseError::InvalidFormat);
        }
        Self::new(algorithm.parse()?, encoded)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parses_and_displays_round_trip() {
        let digest: Digest = EMPTY_SHA256.parse().expect("valid digest");
        assert_eq!(digest.algorithm(), DigestAlgorithm::Sha256);
        assert_eq!(digest.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn rejects_malformed_digests() {
        assert_eq!(
            "nocolon".parse::<Digest>(),
            Err(DigestParseError::InvalidFormat)
        );
        assert_eq!(
            "md5:d41d8cd98f00b204e9800998ecf8427e".parse::<Digest>(),
            Err(DigestParseError::UnsupportedAlgorithm("md5".into()))
        );
        assert_eq!(
            "sha256:abc".parse::<Digest>(),
            Err(DigestParseError::InvalidLength)
        );
        let upper = EMPTY_SHA256.to_uppercase().replacen("SHA256", "sha256", 1);
        assert_eq!(
            upper.parse::<Digest>(),
            Err(DigestParseError::InvalidEncoding)
        );
    }

    #[test]
    fn algorithm_names_round_trip() {
        for algorithm in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
            DigestAlgorithm::Blake3,
        ] {
            assert_eq!(algorithm.as_str().parse::<DigestAlgorithm>(), Ok(algorithm));
        }
    }
}
