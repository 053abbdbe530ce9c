//! Sinks persist the final, ordered feed. A failed write fails the whole run.
use crate::types::OutputRecord;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not move output into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub trait Sink: Send + Sync {
    fn write(&self, records: &[OutputRecord]) -> Result<(), SinkError>;
    /// Where the records end up, for log and confirmation messages.
    fn location(&self) -> String;
}

/// Writes the feed as a JSON array indented by four spaces.
///
/// Output goes to a temporary file next to the target and is renamed over it
/// once fully flushed, so a failed run never leaves a truncated feed behind.
/// A new feed gets the same mode as a plainly created file; replacing a feed
/// keeps the existing file's permissions.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        JsonFileSink { path: path.into() }
    }

    fn temp_file_in(&self, dir: &Path) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".feed");
        // Temp files default to 0600; ask for 0666 and let the umask apply.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let file = builder.tempfile_in(dir)?;

        match fs::metadata(&self.path) {
            Ok(existing) => file.as_file().set_permissions(existing.permissions())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(file)
    }
}

impl Sink for JsonFileSink {
    fn write(&self, records: &[OutputRecord]) -> Result<(), SinkError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = self.temp_file_in(dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            encode(&mut writer, records)?;
            writer.flush()?;
        }
        file.as_file().sync_all()?;
        file.persist(&self.path)?;

        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            "Stored feed"
        );

        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

fn encode<W: Write>(writer: W, records: &[OutputRecord]) -> Result<(), serde_json::Error> {
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
    records.serialize(&mut serializer)
}
