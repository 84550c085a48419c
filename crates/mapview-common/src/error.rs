//! Error types for the mapview crates.

use thiserror::Error;

/// Top-level error type for mapview operations.
#[derive(Debug, Error)]
pub enum MapviewError {
    /// Chunk loading errors
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a chunk loader may report.
///
/// These never reach callers of the cache: a failed load still produces a
/// loaded, empty chunk.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No stored data exists for the requested chunk
    #[error("Chunk not found at ({x}, {z})")]
    NotFound {
        /// X coordinate
        x: i32,
        /// Z coordinate
        z: i32,
    },

    /// Reading the backing storage failed
    #[error("Failed to read chunk: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid magic bytes or header layout
    #[error("Invalid chunk format")]
    InvalidFormat,

    /// Stored data was written by an incompatible schema
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version
        actual: String,
    },

    /// Stored data is structurally broken
    #[error("Corrupt chunk data: {0}")]
    Corrupt(String),

    /// Section payload failed to decompress
    #[error("Decompression failed: {0}")]
    Compression(String),
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for the expected schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// The configuration could not be encoded
    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

/// Result type for chunk loaders.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type alias for mapview operations.
pub type MapviewResult<T> = Result<T, MapviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_messages() {
        let err = LoadError::NotFound { x: 3, z: -4 };
        assert_eq!(err.to_string(), "Chunk not found at (3, -4)");

        let err = LoadError::VersionMismatch {
            expected: "1.0.0".into(),
            actual: "2.0.0".into(),
        };
        assert_eq!(err.to_string(), "Version mismatch: expected 1.0.0, got 2.0.0");
    }

    #[test]
    fn test_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: MapviewError = LoadError::from(io).into();
        assert!(matches!(err, MapviewError::Load(LoadError::Io(_))));
    }
}
