use crate::error::{DriverError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on a single fetched file.
pub const MAX_ARTIFACT_BYTES: u64 = 256 * 1024 * 1024;

/// Reads `reader` to the end, failing instead of truncating when it holds
/// more than `limit` bytes.
fn read_capped(reader: impl Read, limit: u64, source: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| DriverError::Io(format!("{}: {}", source, e)))?;
    if bytes.len() as u64 > limit {
        return Err(DriverError::Io(format!(
            "{} exceeds the {} byte artifact limit",
            source, limit
        )));
    }
    Ok(bytes)
}

/// Fetches files from an artifact repository by path relative to its root.
pub trait ArtifactTransport: Send + Sync {
    fn fetch(&self, relative_path: &str) -> Result<Vec<u8>>;

    /// Human-readable repository location, for logs.
    fn location(&self) -> String;
}

/// Repository laid out in a local directory.
#[derive(Debug, Clone)]
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactTransport for FileTransport {
    fn fetch(&self, relative_path: &str) -> Result<Vec<u8>> {
        let path: PathBuf = self.root.join(relative_path.split('/').collect::<PathBuf>());
        let source = path.display().to_string();
        let file = std::fs::File::open(&path).map_err(|e| DriverError::Io(format!("{}: {}", source, e)))?;
        read_capped(file, MAX_ARTIFACT_BYTES, &source)
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(feature = "remote")]
pub use http::HttpTransport;

#[cfg(feature = "remote")]
mod http {
    use super::{read_capped, ArtifactTransport, MAX_ARTIFACT_BYTES};
    use crate::error::{DriverError, Result};
    use std::time::Duration;
    use ureq::{Agent, AgentBuilder};

    /// Repository served over HTTP(S).
    pub struct HttpTransport {
        agent: Agent,
        base_url: String,
    }

    impl HttpTransport {
        const DEFAULT_USER_AGENT: &'static str =
            concat!("driver_engine/", env!("CARGO_PKG_VERSION"));

        pub fn new(base_url: &str, timeout: Duration) -> Self {
            let agent = AgentBuilder::new()
                .timeout(timeout)
                .user_agent(Self::DEFAULT_USER_AGENT)
                .build();
            Self {
                agent,
                base_url: base_url.trim_end_matches('/').to_string(),
            }
        }
    }

    impl ArtifactTransport for HttpTransport {
        fn fetch(&self, relative_path: &str) -> Result<Vec<u8>> {
            let url = format!("{}/{}", self.base_url, relative_path);
            log::debug!("GET {}", url);
            let response = match self.agent.get(&url).call() {
                Ok(response) => response,
                Err(ureq::Error::Status(code, _)) => {
                    return Err(DriverError::Io(format!("{} returned HTTP {}", url, code)));
                }
                Err(e) => return Err(e.into()),
            };
            let declared = response
                .header("Content-Length")
                .and_then(|v| v.trim().parse::<u64>().ok());
            if let Some(len) = declared.filter(|len| *len > MAX_ARTIFACT_BYTES) {
                return Err(DriverError::Io(format!(
                    "{} declares {} bytes, over the {} byte artifact limit",
                    url, len, MAX_ARTIFACT_BYTES
                )));
            }
            read_capped(response.into_reader(), MAX_ARTIFACT_BYTES, &url)
        }

        fn location(&self) -> String {
            self.base_url.clone()
        }
    }
}

/// Picks the transport for a repository URL: `http(s)://` goes over HTTP,
/// `file://` or a plain path reads a local directory.
pub fn transport_for(repository_url: &str, timeout: Duration) -> Result<Box<dyn ArtifactTransport>> {
    let url = repository_url.trim();
    if url.is_empty() {
        return Err(DriverError::ConfigError("Repository URL is empty".to_string()));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "remote")]
        {
            return Ok(Box::new(HttpTransport::new(url, timeout)));
        }
        #[cfg(not(feature = "remote"))]
        {
            let _ = timeout;
            return Err(DriverError::ConfigError(format!(
                "HTTP repository {} requires the `remote` feature",
                url
            )));
        }
    }
    let root = url.strip_prefix("file://").unwrap_or(url);
    Ok(Box::new(FileTransport::new(Path::new(root))))
}
