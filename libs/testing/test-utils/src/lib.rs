//! Shared test utilities for domain testing
//!
//! - `TestDataBuilder`: deterministic filenames, image bytes and multipart bodies
//! - `MultipartBody`: hand-built `multipart/form-data` request bodies
//! - `TestTempDir`: throwaway directory removed on drop
//! - `assertions`: custom assertion helpers
//!
//! # Usage
//!
//! ```rust
//! use test_utils::{TestDataBuilder, TestTempDir};
//!
//! let builder = TestDataBuilder::from_test_name("upload_two_images");
//! let body = builder
//!     .multipart()
//!     .file("files", &builder.filename("cat", "png"), "image/png", &builder.png_bytes())
//!     .file("files", "notes.txt", "text/plain", b"hello");
//!
//! let dir = TestTempDir::new();
//! assert!(dir.path().exists());
//! assert!(body.content_type().starts_with("multipart/form-data; boundary="));
//! ```

use std::path::{Path, PathBuf};
use uuid::Uuid;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_upload");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic id derived from the seed
    pub fn id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Filename unique to this builder, e.g. `test-cat-12345.png`
    pub fn filename(&self, stem: &str, extension: &str) -> String {
        format!("test-{}-{}.{}", stem, self.seed, extension)
    }

    /// Bytes starting with the PNG signature; not a decodable image.
    pub fn png_bytes(&self) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&self.seed.to_be_bytes());
        bytes
    }

    /// Empty multipart body with a boundary derived from the seed
    pub fn multipart(&self) -> MultipartBody {
        MultipartBody::new(format!("test-boundary-{}", self.seed))
    }
}

/// `multipart/form-data` body assembled part by part.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    buffer: Vec<u8>,
}

impl MultipartBody {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buffer: Vec::new(),
        }
    }

    /// Value for the request's `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Append a file part.
    pub fn file(mut self, field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n",
            field, filename, content_type
        ));
        self.buffer.extend_from_slice(bytes);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Append a plain form field.
    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            field
        ));
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    fn open_part(&mut self, headers: &str) {
        self.buffer
            .extend_from_slice(format!("--{}\r\n{}\r\n", self.boundary, headers).as_bytes());
    }

    /// Finished body including the closing boundary.
    pub fn build(&self) -> Vec<u8> {
        let mut body = self.buffer.clone();
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body
    }
}

/// Temporary directory deleted when dropped.
pub struct TestTempDir {
    dir: tempfile::TempDir,
}

impl TestTempDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap_or_else(|e| panic!("failed to create temp dir: {}", e)),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Regular files currently in the directory, sorted
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.path())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }
}

impl Default for TestTempDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Test assertion helpers
pub mod assertions {
    use uuid::Uuid;

    /// Assert that two UUIDs are equal with a nice error message
    pub fn assert_uuid_eq(actual: Uuid, expected: Uuid, context: &str) {
        assert_eq!(
            actual, expected,
            "{}: expected UUID {}, got {}",
            context, expected, actual
        );
    }

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that `items` appear in `haystack` in the given relative order
    pub fn assert_in_order<T: PartialEq + std::fmt::Debug>(haystack: &[T], items: &[T], context: &str) {
        let mut position = 0;
        for item in items {
            match haystack[position..].iter().position(|candidate| candidate == item) {
                Some(offset) => position += offset + 1,
                None => panic!(
                    "{}: expected {:?} after index {} in {:?}",
                    context, item, position, haystack
                ),
            }
        }
    }
}
