//! Media sources for image, record and video segments.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use onecat_core::{MessageError, MessageResult};

/// Where the bytes of a media segment come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A local file. Sent as a `file://` URI.
    Path(PathBuf),
    /// Raw bytes. Sent inline as `base64://`.
    Bytes(Vec<u8>),
    /// Anything the gateway resolves itself: `http(s)://`, `file://`,
    /// `base64://` or a cached file name.
    Url(String),
}

impl MediaSource {
    /// Interprets a string: URI-like strings are passed through, everything
    /// else is a local path.
    pub fn parse(s: &str) -> Self {
        const SCHEMES: [&str; 4] = ["http://", "https://", "file://", "base64://"];
        if SCHEMES.iter().any(|scheme| s.starts_with(scheme)) {
            Self::Url(s.to_string())
        } else {
            Self::Path(PathBuf::from(s))
        }
    }

    /// Produces the `file` value for the wire.
    ///
    /// Local paths must exist.
    pub fn resolve(&self) -> MessageResult<String> {
        match self {
            Self::Path(path) => file_uri(path),
            Self::Bytes(bytes) => Ok(format!("base64://{}", STANDARD.encode(bytes))),
            Self::Url(url) => Ok(url.clone()),
        }
    }
}

fn file_uri(path: &Path) -> MessageResult<String> {
    let absolute = std::fs::canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MessageError::FileNotFound(path.to_path_buf()),
        _ => MessageError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;
    let display = absolute.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        Ok(format!("file://{display}"))
    } else {
        Ok(format!("file:///{display}"))
    }
}

impl From<&str> for MediaSource {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for MediaSource {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&Path> for MediaSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for MediaSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for MediaSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for MediaSource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

/// Download hints forwarded verbatim with a media segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaOptions {
    /// Image sub-kind, e.g. `"flash"`. Ignored for record and video.
    pub kind: Option<String>,
    /// Network URL to use alongside a local file. Images only.
    pub url: Option<String>,
    /// Whether the gateway may use its download cache.
    pub cache: bool,
    /// Whether the gateway downloads through its proxy.
    pub proxy: bool,
    /// Download timeout in seconds.
    pub timeout: Option<u64>,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            kind: None,
            url: None,
            cache: true,
            proxy: true,
            timeout: None,
        }
    }
}

impl MediaOptions {
    /// Options for a flash image.
    pub fn flash() -> Self {
        Self {
            kind: Some("flash".to_string()),
            ..Self::default()
        }
    }

    /// Sets the download timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Sets the cache flag.
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the proxy flag.
    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub(crate) fn cache_flag(&self) -> Option<String> {
        Some(flag(self.cache))
    }

    pub(crate) fn proxy_flag(&self) -> Option<String> {
        Some(flag(self.proxy))
    }

    pub(crate) fn timeout_value(&self) -> Option<String> {
        self.timeout.map(|t| t.to_string())
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schemes() {
        assert_eq!(
            MediaSource::parse("https://example.com/a.png"),
            MediaSource::Url("https://example.com/a.png".into())
        );
        assert_eq!(
            MediaSource::parse("base64://AAAA"),
            MediaSource::Url("base64://AAAA".into())
        );
        assert_eq!(
            MediaSource::parse("images/cat.png"),
            MediaSource::Path(PathBuf::from("images/cat.png"))
        );
    }

    #[test]
    fn test_bytes_become_base64() {
        let source = MediaSource::from(b"hi".as_slice());
        assert_eq!(source.resolve().unwrap(), "base64://aGk=");
    }

    #[test]
    fn test_missing_path_is_file_not_found() {
        let source = MediaSource::parse("/definitely/not/here.png");
        assert!(matches!(source.resolve(), Err(MessageError::FileNotFound(_))));
    }

    #[test]
    fn test_existing_path_becomes_file_uri() {
        let file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();

        let uri = MediaSource::from(file.path().to_path_buf()).resolve().unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with(".bin"));
    }
}
