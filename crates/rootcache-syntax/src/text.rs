//! Source text and text sources
//!
//! [`ConstantTextSource`] keeps text in memory for the life of the handle.
//! [`FileTextSource`] loads from disk on demand and only keeps a weak copy,
//! so text is re-read once every holder has let go of it. A re-read returns
//! whatever the file holds now; callers that need the original contents
//! compare checksums.

use crate::error::TextError;
use crate::hash::Checksum;
use crate::host::TextSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;

/// Immutable file contents plus their checksum
#[derive(Clone, PartialEq, Eq)]
pub struct SourceText {
    text: Arc<str>,
    checksum: Checksum,
}

impl SourceText {
    /// Wrap text, computing its checksum
    #[must_use]
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let checksum = Checksum::compute(text.as_bytes());
        Self { text, checksum }
    }

    /// The text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether the text is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Blake3 checksum of the text
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }
}

impl fmt::Debug for SourceText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceText")
            .field("len", &self.text.len())
            .field("checksum", &self.checksum.short())
            .finish()
    }
}

impl From<&str> for SourceText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SourceText {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Monotonic version of a document's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionStamp(pub u64);

/// Text together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAndVersion {
    /// The text
    pub text: SourceText,
    /// Its version
    pub version: VersionStamp,
}

impl TextAndVersion {
    /// Pair text with a version
    #[inline]
    #[must_use]
    pub fn new(text: SourceText, version: VersionStamp) -> Self {
        Self { text, version }
    }
}

/// Text that is always available
#[derive(Debug, Clone)]
pub struct ConstantTextSource {
    value: TextAndVersion,
}

impl ConstantTextSource {
    /// Create source at version 0
    #[must_use]
    pub fn new(text: impl Into<SourceText>) -> Self {
        Self::with_version(text, VersionStamp::default())
    }

    /// Create source at a given version
    #[must_use]
    pub fn with_version(text: impl Into<SourceText>, version: VersionStamp) -> Self {
        Self {
            value: TextAndVersion::new(text.into(), version),
        }
    }
}

#[async_trait]
impl TextSource for ConstantTextSource {
    fn try_get_value(&self) -> Option<TextAndVersion> {
        Some(self.value.clone())
    }

    fn get_value(&self, cancel: &CancellationToken) -> Result<TextAndVersion, TextError> {
        if cancel.is_cancelled() {
            return Err(TextError::Cancelled);
        }
        Ok(self.value.clone())
    }

    async fn get_value_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, TextError> {
        self.get_value(cancel)
    }
}

#[derive(Debug)]
struct WeakText {
    text: Weak<str>,
    checksum: Checksum,
    version: VersionStamp,
}

/// Text loaded from disk on demand
#[derive(Debug)]
pub struct FileTextSource {
    path: PathBuf,
    cached: Mutex<Option<WeakText>>,
}

impl FileTextSource {
    /// Create source for `path`; nothing is read until requested
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Path being read
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remember(&self, contents: String, version: VersionStamp) -> TextAndVersion {
        let text = SourceText::new(contents);
        *self.cached.lock() = Some(WeakText {
            text: Arc::downgrade(&text.text),
            checksum: text.checksum,
            version,
        });
        TextAndVersion::new(text, version)
    }

    fn version_of(metadata: &std::fs::Metadata) -> VersionStamp {
        let nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        VersionStamp(nanos)
    }

    fn io_error(&self, err: &std::io::Error) -> TextError {
        TextError::io(self.path.display().to_string(), err)
    }
}

#[async_trait]
impl TextSource for FileTextSource {
    fn try_get_value(&self) -> Option<TextAndVersion> {
        let cached = self.cached.lock();
        let weak = cached.as_ref()?;
        let text = weak.text.upgrade()?;
        Some(TextAndVersion::new(
            SourceText {
                text,
                checksum: weak.checksum,
            },
            weak.version,
        ))
    }

    fn get_value(&self, cancel: &CancellationToken) -> Result<TextAndVersion, TextError> {
        if let Some(value) = self.try_get_value() {
            return Ok(value);
        }
        if cancel.is_cancelled() {
            return Err(TextError::Cancelled);
        }
        let metadata = std::fs::metadata(&self.path).map_err(|e| self.io_error(&e))?;
        let contents = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(&e))?;
        Ok(self.remember(contents, Self::version_of(&metadata)))
    }

    async fn get_value_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, TextError> {
        if let Some(value) = self.try_get_value() {
            return Ok(value);
        }
        // tokio::fs needs a runtime; callers driving us from a plain executor
        // get the blocking read instead.
        if tokio::runtime::Handle::try_current().is_err() {
            return self.get_value(cancel);
        }
        let read = async {
            let metadata = tokio::fs::metadata(&self.path).await?;
            let contents = tokio::fs::read_to_string(&self.path).await?;
            Ok::<_, std::io::Error>((contents, Self::version_of(&metadata)))
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TextError::Cancelled),
            loaded = read => {
                let (contents, version) = loaded.map_err(|e| self.io_error(&e))?;
                Ok(self.remember(contents, version))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn constant_source_always_available() {
        let source = ConstantTextSource::new("fn main() {}");
        let value = source.try_get_value().unwrap();
        assert_eq!(value.text.as_str(), "fn main() {}");
        assert_eq!(value.version, VersionStamp(0));
    }

    #[test]
    fn constant_source_honors_cancellation() {
        let source = ConstantTextSource::new("x");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(source.get_value(&cancel), Err(TextError::Cancelled));
    }

    #[test]
    fn file_source_caches_weakly() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "line one\nline two\n").unwrap();
        let source = FileTextSource::new(file.path());

        assert!(source.try_get_value().is_none());

        let value = source.get_value(&CancellationToken::new()).unwrap();
        assert_eq!(value.text.as_str(), "line one\nline two\n");
        assert!(source.try_get_value().is_some());

        drop(value);
        assert!(source.try_get_value().is_none());
    }

    #[test]
    fn file_source_reports_missing_file() {
        let source = FileTextSource::new("/definitely/not/here.rs");
        let err = source.get_value(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, TextError::Io { .. }));
    }

    #[tokio::test]
    async fn file_source_async_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "async text").unwrap();
        let source = FileTextSource::new(file.path());

        let value = source
            .get_value_async(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value.text.as_str(), "async text");
        assert_eq!(value.text.checksum(), Checksum::compute(b"async text"));
    }
}
