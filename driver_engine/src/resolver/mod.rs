//! Remote artifact resolution.
//!
//! A repository holds one directory per artifact version:
//!
//! ```text
//! {base}/{group as path}/{artifact}/{version}/{artifact}-{version}.json
//! {base}/{group as path}/{artifact}/{version}/{file}
//! ```
//!
//! The JSON descriptor names the module `file` and the coordinates of its
//! `dependencies`. Resolved artifacts are mirrored into a local cache with
//! the same layout; a cached artifact is never fetched again.

pub mod coordinate;
pub mod transport;

pub use coordinate::{ArtifactDescriptor, Coordinate};
#[cfg(feature = "remote")]
pub use transport::HttpTransport;
pub use transport::{transport_for, ArtifactTransport, FileTransport};

use crate::error::{DriverError, Result};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ArtifactResolver {
    transport: Box<dyn ArtifactTransport>,
    cache_dir: PathBuf,
}

impl ArtifactResolver {
    pub fn new(transport: Box<dyn ArtifactTransport>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn for_repository(repository_url: &str, cache_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        Ok(Self::new(transport_for(repository_url, timeout)?, cache_dir))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolves `coordinate` and its transitive dependencies. The first path
    /// is the module itself; dependencies follow breadth-first, the nearest
    /// version of each `group:artifact` winning.
    pub fn resolve(&self, coordinate: &str) -> Result<Vec<PathBuf>> {
        let root: Coordinate = coordinate.parse()?;
        log::info!("Resolving {} from {}", root, self.transport.location());

        let mut queue = VecDeque::from([root.clone()]);
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.key()) {
                continue;
            }
            let (file, dependencies) =
                self.fetch_artifact(&current)
                    .map_err(|e| DriverError::ArtifactResolutionFailure {
                        coordinate: root.to_string(),
                        reason: if current == root {
                            e.to_string()
                        } else {
                            format!("{}: {}", current, e)
                        },
                    })?;
            files.push(file);
            for dep in dependencies {
                let dep: Coordinate =
                    dep.parse()
                        .map_err(|e: DriverError| DriverError::ArtifactResolutionFailure {
                            coordinate: root.to_string(),
                            reason: format!("{} declares {}", current, e),
                        })?;
                if !seen.contains(&dep.key()) {
                    queue.push_back(dep);
                }
            }
        }

        log::info!("Resolved {} to {} file(s)", root, files.len());
        Ok(files)
    }

    /// Cached module path and declared dependencies of one artifact,
    /// downloading whatever is not cached yet.
    fn fetch_artifact(&self, coordinate: &Coordinate) -> Result<(PathBuf, Vec<String>)> {
        let dir = self.cache_dir.join(coordinate.local_dir());
        let descriptor_path = dir.join(coordinate.descriptor_name());

        let (descriptor, descriptor_bytes) = if descriptor_path.is_file() {
            let bytes = std::fs::read(&descriptor_path)?;
            (serde_json::from_slice::<ArtifactDescriptor>(&bytes)?, None)
        } else {
            let remote = format!("{}/{}", coordinate.relative_dir(), coordinate.descriptor_name());
            let bytes = self.transport.fetch(&remote)?;
            (serde_json::from_slice::<ArtifactDescriptor>(&bytes)?, Some(bytes))
        };
        descriptor
            .validate()
            .map_err(DriverError::InvalidModule)?;

        std::fs::create_dir_all(&dir)?;
        let file_path = dir.join(&descriptor.file);
        if !file_path.is_file() {
            let remote = format!("{}/{}", coordinate.relative_dir(), descriptor.file);
            let bytes = self.transport.fetch(&remote)?;
            write_atomic(&file_path, &bytes)?;
            log::debug!("Cached {} ({} bytes)", file_path.display(), bytes.len());
        }
        // Written last so a cached descriptor implies a cached module.
        if let Some(bytes) = descriptor_bytes {
            write_atomic(&descriptor_path, &bytes)?;
        }

        Ok((file_path, descriptor.dependencies))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryRepository {
        files: HashMap<String, Vec<u8>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MemoryRepository {
        fn publish(&mut self, coordinate: &str, file: &str, deps: &[&str]) {
            let c: Coordinate = coordinate.parse().unwrap();
            let descriptor = ArtifactDescriptor {
                file: file.to_string(),
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
            };
            self.files.insert(
                format!("{}/{}", c.relative_dir(), c.descriptor_name()),
                serde_json::to_vec(&descriptor).unwrap(),
            );
            self.files.insert(
                format!("{}/{}", c.relative_dir(), file),
                format!("bytes of {}", coordinate).into_bytes(),
            );
        }
    }

    impl ArtifactTransport for MemoryRepository {
        fn fetch(&self, relative_path: &str) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(relative_path.to_string());
            self.files
                .get(relative_path)
                .cloned()
                .ok_or_else(|| DriverError::Io(format!("{} not found", relative_path)))
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_resolve_transitive_breadth_first_nearest_wins() {
        let mut repo = MemoryRepository::default();
        repo.publish("org.db:driver:1.0", "libdriver.so", &["org.db:net:2.0", "org.db:tls:1.1"]);
        repo.publish("org.db:net:2.0", "libnet.so", &["org.db:tls:0.9", "org.db:zlib:1.0"]);
        repo.publish("org.db:tls:1.1", "libtls11.so", &[]);
        repo.publish("org.db:tls:0.9", "libtls09.so", &[]);
        repo.publish("org.db:zlib:1.0", "libz.so", &[]);

        let cache = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(Box::new(repo), cache.path());
        let files = resolver.resolve("org.db:driver:1.0").unwrap();

        assert_eq!(
            names(&files),
            vec!["libdriver.so", "libnet.so", "libtls11.so", "libz.so"]
        );
        assert!(files.iter().all(|f| f.starts_with(cache.path()) && f.is_file()));
    }

    #[test]
    fn test_second_resolution_uses_cache_only() {
        let mut repo = MemoryRepository::default();
        repo.publish("org.db:driver:1.0", "libdriver.so", &["org.db:net:2.0"]);
        repo.publish("org.db:net:2.0", "libnet.so", &[]);
        let calls = Arc::clone(&repo.calls);

        let cache = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(Box::new(repo), cache.path());
        let first = resolver.resolve("org.db:driver:1.0").unwrap();
        let fetched = calls.lock().unwrap().len();
        assert_eq!(fetched, 4);

        let second = resolver.resolve("org.db:driver:1.0").unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.lock().unwrap().len(), fetched);
    }

    #[test]
    fn test_missing_artifact_names_coordinate() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(Box::new(MemoryRepository::default()), cache.path());
        match resolver.resolve("org.db:missing:1.0") {
            Err(DriverError::ArtifactResolutionFailure { coordinate, .. }) => {
                assert_eq!(coordinate, "org.db:missing:1.0")
            }
            other => panic!("unexpected: {:?}", other.map(|f| f.len())),
        }
    }

    #[test]
    fn test_missing_dependency_fails_whole_resolution() {
        let mut repo = MemoryRepository::default();
        repo.publish("org.db:driver:1.0", "libdriver.so", &["org.db:gone:1.0"]);
        let cache = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(Box::new(repo), cache.path());
        let err = resolver.resolve("org.db:driver:1.0").unwrap_err();
        assert!(err.to_string().contains("org.db:gone:1.0"));
    }

    #[test]
    fn test_resolve_from_file_repository() {
        let repo = tempfile::tempdir().unwrap();
        let dir = repo.path().join("org/db/driver/1.0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("driver-1.0.json"), br#"{"file":"libdriver.so"}"#).unwrap();
        std::fs::write(dir.join("libdriver.so"), b"module").unwrap();

        let cache = tempfile::tempdir().unwrap();
        let url = format!("file://{}", repo.path().display());
        let resolver = ArtifactResolver::for_repository(&url, cache.path(), Duration::from_secs(1)).unwrap();
        let files = resolver.resolve("org.db:driver:1.0").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"module");
    }
}
