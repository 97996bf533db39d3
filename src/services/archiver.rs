//! Bundles rendered and downloaded images into a flat zip archive.

use std::{
    collections::HashSet,
    fs::File,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;
use zip::{
    CompressionMethod, DateTime, ZipWriter,
    result::ZipError,
    write::FileOptions,
};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive input {} is missing", .0.display())]
    MissingInput(PathBuf),
    #[error("`{0}` is not a valid archive member name")]
    InvalidName(String),
    #[error("archive i/o on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Zip(#[from] ZipError),
    #[error("archive task aborted: {0}")]
    Task(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Creates zip archives. Blocking; the pipeline calls it from `spawn_blocking`.
pub trait Archiver: Send + Sync {
    /// Write a new archive at `archive_path` holding every name in
    /// `file_names` resolved against `base_dir`, stored under its bare file
    /// name. An existing file at `archive_path` is replaced.
    fn zip(&self, archive_path: &Path, file_names: &[String], base_dir: &Path) -> ArchiveResult<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn zip(&self, archive_path: &Path, file_names: &[String], base_dir: &Path) -> ArchiveResult<()> {
        let mut members = Vec::with_capacity(file_names.len());
        let mut seen = HashSet::new();
        for name in file_names {
            let member = Path::new(name)
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ArchiveError::InvalidName(name.clone()))?
                .to_string();
            let source = base_dir.join(name);
            if !source.is_file() {
                return Err(ArchiveError::MissingInput(source));
            }
            if seen.insert(member.clone()) {
                members.push((member, source));
            }
        }

        let result = write_archive(archive_path, &members);
        if result.is_err() {
            let _ = std::fs::remove_file(archive_path);
        }
        result
    }
}

fn write_archive(archive_path: &Path, members: &[(String, PathBuf)]) -> ArchiveResult<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ArchiveError::Io { path, source }
    };

    let file = File::create(archive_path).map_err(io_err(archive_path))?;
    let mut zip = ZipWriter::new(file);
    // Fixed timestamps keep archives of identical inputs byte-identical.
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    for (member, source) in members {
        zip.start_file(member.as_str(), options)?;
        let mut input = File::open(source).map_err(io_err(source))?;
        io::copy(&mut input, &mut zip).map_err(io_err(source))?;
    }

    zip.finish()?;
    debug!(archive = %archive_path.display(), members = members.len(), "archive written");
    Ok(())
}
