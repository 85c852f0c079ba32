//! Parser for `Digest: <algorithm>=<value>` integrity headers.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestHeaderError {
    #[error("Digest header is missing")]
    ValueMissing,
    #[error("Digest header has an unknown format")]
    UnknownFormat,
    #[error("Digest header is missing the algorithm")]
    AlgorithmMissing,
    #[error("{0} is not a supported digest algorithm")]
    UnsupportedAlgorithm(String),
    #[error("Digest header is missing the digest")]
    DigestMissing,
}

#[derive(Debug, Clone)]
pub struct DigestHeaderParser {
    algorithm: String,
}

impl DigestHeaderParser {
    pub fn new(algorithm: &str) -> Self {
        Self {
            algorithm: algorithm.to_string(),
        }
    }

    /// Returns the digest value, unmodified, if the header names the expected
    /// algorithm.
    pub fn parse<'a>(&self, header: Option<&'a str>) -> Result<&'a str, DigestHeaderError> {
        let header = match header {
            Some(value) if !value.is_empty() => value,
            _ => return Err(DigestHeaderError::ValueMissing),
        };

        let (algorithm, digest) = header.split_once('=').unwrap_or((header, ""));
        match (algorithm.is_empty(), digest.is_empty()) {
            (true, true) => Err(DigestHeaderError::UnknownFormat),
            (true, false) => Err(DigestHeaderError::AlgorithmMissing),
            (false, _) if !algorithm.eq_ignore_ascii_case(&self.algorithm) => {
                Err(DigestHeaderError::UnsupportedAlgorithm(algorithm.to_string()))
            }
            (false, true) => Err(DigestHeaderError::DigestMissing),
            (false, false) => Ok(digest),
        }
    }
}
