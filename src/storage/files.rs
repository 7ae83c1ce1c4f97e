//! Binary file storage for uploaded schema documents

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

/// Opaque blob store keyed by file id
pub trait FileStorage: Send + Sync {
    /// Store the stream under `name` and return the id it can be fetched by
    fn upload(&self, input: &mut dyn Read, name: &str) -> io::Result<String>;

    fn download(&self, name: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Returns `false` when nothing was stored under `name`
    fn delete(&self, name: &str) -> io::Result<bool>;
}

/// Keeps files flat under a single directory
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    directory: PathBuf,
}

impl LocalFileStorage {
    pub fn new(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Generate a fresh upload id
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(&['/', '\\'][..]) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name '{}'", name),
            ));
        }
        Ok(self.directory.join(name))
    }
}

impl FileStorage for LocalFileStorage {
    fn upload(&self, input: &mut dyn Read, name: &str) -> io::Result<String> {
        let path = self.path_for(name)?;
        let mut file = File::create(&path)?;
        let bytes = io::copy(input, &mut file)?;
        debug!(name, bytes, "stored file");
        Ok(name.to_string())
    }

    fn download(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = self.path_for(name)?;
        Ok(Box::new(File::open(path)?))
    }

    fn delete(&self, name: &str) -> io::Result<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
