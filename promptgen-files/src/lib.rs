use log::{debug, warn};
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// One generated file as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileRecord {
    /// Relative path, `relative_path/file_name.ext`.
    #[serde(rename = "file_name")]
    pub name: String,
    /// Complete file content, written verbatim.
    #[serde(rename = "source_code")]
    pub code: String,
}

/// Errors that stop the whole batch before anything is written.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("response is not a JSON array of files: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to create output directory {path}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single record was skipped.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("file name is empty")]
    EmptyName,
    #[error("file name `{0}` escapes the output directory")]
    UnsafePath(String),
    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct WrittenFile {
    /// 1-based position of the record in the response.
    pub index: usize,
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct RecordFailure {
    pub index: usize,
    pub name: String,
    pub error: RecordError,
}

/// Outcome of writing a parsed batch, in response order.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub attempted: usize,
    pub written: Vec<WrittenFile>,
    pub failures: Vec<RecordFailure>,
}

impl MaterializeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.written.len() == self.attempted
    }
}

/// Parses the model output into file records.
///
/// Surrounding whitespace is ignored. The parse is all-or-nothing: a single
/// malformed element rejects the whole response.
pub fn parse_records(response_text: &str) -> Result<Vec<FileRecord>, MaterializeError> {
    let records: Vec<FileRecord> = serde_json::from_str(response_text.trim())?;
    debug!("parsed {} file record(s)", records.len());
    Ok(records)
}

/// Writes records sequentially in the given order.
///
/// Per-record failures are collected in the report and do not stop the
/// batch. Later records with the same name overwrite earlier ones.
pub fn write_records(
    records: &[FileRecord],
    output_dir: &Path,
) -> Result<MaterializeReport, MaterializeError> {
    create_dir_all(output_dir).map_err(|source| MaterializeError::OutputDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let mut report = MaterializeReport {
        attempted: records.len(),
        ..MaterializeReport::default()
    };

    for (offset, record) in records.iter().enumerate() {
        let index = offset + 1;
        match write_record(record, output_dir) {
            Ok(path) => {
                debug!("wrote {} ({} bytes)", path.display(), record.code.len());
                report.written.push(WrittenFile {
                    index,
                    name: record.name.clone(),
                    path,
                });
            }
            Err(error) => {
                warn!("skipping file #{index} `{}`: {error}", record.name);
                report.failures.push(RecordFailure {
                    index,
                    name: record.name.clone(),
                    error,
                });
            }
        }
    }

    Ok(report)
}

fn write_record(record: &FileRecord, output_dir: &Path) -> Result<PathBuf, RecordError> {
    let relative = sanitize_relative_path(&record.name)?;
    let path = output_dir.join(relative);

    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|source| RecordError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    write_file(&path, record.code.as_bytes()).map_err(|source| RecordError::Write {
        path: path.clone(),
        source,
    })?;

    Ok(path)
}

/// Normalizes a model-supplied name into a path that stays below the output
/// root.
///
/// `.` segments are dropped. Absolute paths, drive prefixes and `..` segments
/// are rejected outright rather than rewritten.
pub fn sanitize_relative_path(name: &str) -> Result<PathBuf, RecordError> {
    if name.trim().is_empty() {
        return Err(RecordError::EmptyName);
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RecordError::UnsafePath(name.to_string()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(RecordError::EmptyName);
    }

    Ok(relative)
}

fn create_dir_all(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(path)
}

fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options.open(path)?;
    file.write_all(contents)
}
