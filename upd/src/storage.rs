//! On-disk storage of uploaded files.
//!
//! Uploads are written to `<root>/<filename>`, where the filename is the basename of the name the
//! client declared. Bytes are spooled through a [`Spool`]: held in memory up to the configured
//! threshold, then spilled to a temporary file inside the storage root. On commit the temporary
//! file is renamed over the target, so readers see either the previous file or the complete new
//! one, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::BytesMut;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, StorageConfig};
use crate::errors::{Error, Result};

/// Longest filename, in bytes, most filesystems accept for a single path component.
pub const MAX_FILENAME_LEN: usize = 255;

/// Turns a client-declared filename into a name that is safe to join onto the storage root.
///
/// Only the last path segment is kept (both `/` and `\` count as separators), so
/// `../../etc/passwd` becomes `passwd`. Names with no usable segment are rejected.
pub fn resolve_filename(declared: Option<&str>) -> Result<String> {
    let Some(declared) = declared else {
        return Err(Error::BadRequest {
            message: "Invalid filename: the 'file' part has no filename".to_string(),
        });
    };

    let basename = declared.trim().rsplit(['/', '\\']).next().unwrap_or("").trim();

    if basename.is_empty() || basename == "." || basename == ".." {
        return Err(Error::BadRequest {
            message: format!("Invalid filename: {declared:?}"),
        });
    }

    if basename.len() > MAX_FILENAME_LEN {
        return Err(Error::BadRequest {
            message: format!("Invalid filename: longer than {MAX_FILENAME_LEN} bytes"),
        });
    }

    if basename.contains('\0') {
        return Err(Error::BadRequest {
            message: "Invalid filename: contains a NUL byte".to_string(),
        });
    }

    Ok(basename.to_string())
}

/// Ensures the storage root is usable at startup.
///
/// With `create_root` the directory (and its parents) is created. Otherwise a missing root is
/// only logged: uploads fail with 500 until it appears.
pub async fn prepare_root(config: &StorageConfig) -> anyhow::Result<()> {
    if config.create_root {
        tokio::fs::create_dir_all(&config.root)
            .await
            .with_context(|| format!("failed to create storage root {}", config.root.display()))?;
        info!(root = %config.root.display(), "Storage root ready");
        return Ok(());
    }

    match tokio::fs::metadata(&config.root).await {
        Ok(metadata) if metadata.is_dir() => {
            info!(root = %config.root.display(), "Storage root ready");
        }
        Ok(_) => {
            warn!(root = %config.root.display(), "Storage root is not a directory, uploads will fail");
        }
        Err(e) => {
            warn!(root = %config.root.display(), error = %e, "Storage root is not accessible, uploads will fail");
        }
    }

    Ok(())
}

/// Location and buffering policy for stored uploads.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    max_memory: usize,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, max_memory: usize) -> Self {
        Self {
            root: root.into(),
            max_memory,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let max_memory = usize::try_from(config.limits.max_multipart_memory).unwrap_or(usize::MAX);
        Self::new(config.storage.root.clone(), max_memory)
    }

    /// Final location of an upload. `filename` must come from [`resolve_filename`].
    pub fn target_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Starts spooling an upload destined for `filename`.
    pub fn spool(&self, filename: &str) -> Spool {
        Spool {
            target: self.target_path(filename),
            temp_path: self.root.join(format!(".upd-{}.part", Uuid::new_v4())),
            max_memory: self.max_memory,
            buffer: BytesMut::new(),
            file: None,
            temp_created: false,
            committed: false,
            written: 0,
        }
    }
}

/// Buffer for a single upload in flight.
///
/// Dropping a spool without committing it removes its temporary file, which covers both failed
/// uploads and requests abandoned by the client mid-stream.
#[derive(Debug)]
pub struct Spool {
    target: PathBuf,
    temp_path: PathBuf,
    max_memory: usize,
    buffer: BytesMut,
    file: Option<File>,
    temp_created: bool,
    committed: bool,
    written: u64,
}

impl Spool {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Whether the upload outgrew the memory threshold and now lives in a temporary file.
    pub fn is_spilled(&self) -> bool {
        self.file.is_some()
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.written += chunk.len() as u64;

        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
            return Ok(());
        }

        if self.buffer.len() + chunk.len() <= self.max_memory {
            self.buffer.extend_from_slice(chunk);
            return Ok(());
        }

        let mut file = self.create_temp().await?;
        file.write_all(&self.buffer).await?;
        file.write_all(chunk).await?;
        debug!(
            target_path = %self.target.display(),
            spilled_bytes = self.written,
            threshold = self.max_memory,
            "Upload exceeded memory threshold, spilled to temporary file"
        );
        self.buffer = BytesMut::new();
        self.file = Some(file);

        Ok(())
    }

    /// Moves the upload into place, replacing any existing file. Returns the number of bytes stored.
    pub async fn commit(mut self) -> Result<u64> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => {
                let mut file = self.create_temp().await?;
                file.write_all(&self.buffer).await?;
                file
            }
        };

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&self.temp_path, &self.target).await?;
        self.committed = true;

        Ok(self.written)
    }

    async fn create_temp(&mut self) -> Result<File> {
        let file = OpenOptions::new().write(true).create_new(true).open(&self.temp_path).await?;
        self.temp_created = true;
        Ok(file)
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if self.temp_created && !self.committed {
            // Close the handle before unlinking so this also works on Windows
            self.file.take();
            // A single unlink, done inline: drop cannot await
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                warn!(path = %self.temp_path.display(), error = %e, "Failed to remove temporary upload file");
            }
        }
    }
}
