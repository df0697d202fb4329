use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a database lives, parsed from a connection URL.
///
/// - `memory://name`: in-process only, nothing persisted
/// - `file:///abs/path.wal` or `file://rel/path.wal`: WAL-backed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Memory(String),
    File(PathBuf),
}

impl Location {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Location::File(path.as_ref().to_path_buf())
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Location::File(_))
    }

    /// The URL form of this location.
    pub fn url(&self) -> String {
        self.to_string()
    }

    /// Resolve a file location to an absolute, symlink-free path so every
    /// spelling of one log maps to the same location. Creates the parent
    /// directory of a log that does not exist yet.
    pub fn canonical(&self) -> io::Result<Location> {
        let Location::File(path) = self else {
            return Ok(self.clone());
        };
        if path.exists() {
            return Ok(Location::File(fs::canonicalize(path)?));
        }
        let name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        Ok(Location::File(fs::canonicalize(parent)?.join(name)))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Memory(name) => write!(f, "memory://{name}"),
            Location::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationError(pub String);

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid database url: {}", self.0)
    }
}

impl std::error::Error for LocationError {}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| LocationError(format!("missing scheme in {url:?}")))?;
        match scheme.to_ascii_lowercase().as_str() {
            "memory" | "mem" => {
                if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                    return Err(LocationError(format!("bad memory database name in {url:?}")));
                }
                Ok(Location::Memory(rest.to_string()))
            }
            "file" => {
                if rest.is_empty() {
                    return Err(LocationError(format!("empty path in {url:?}")));
                }
                if Path::new(rest).components().any(|c| c == std::path::Component::ParentDir) {
                    return Err(LocationError(format!("path traversal in {url:?}")));
                }
                Ok(Location::File(PathBuf::from(rest)))
            }
            other => Err(LocationError(format!("unsupported scheme {other:?}"))),
        }
    }
}
