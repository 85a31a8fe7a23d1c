//! Local files attached to multipart uploads.
//!
//! A [`File`] is opened lazily, just before the upload body is assembled,
//! and closed once the request has been dispatched unless it was created
//! with `close_on_complete` turned off, in which case the caller owns the
//! open handle.

use anyhow::{Context, Result};
use log::debug;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::SimbaError;
use crate::runtime::Runtime;

pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Guesses a MIME type from a file name's extension.
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_MIME.to_string())
}

/// A file to upload, backed by a path or by a caller-supplied reader.
pub struct File {
    path: Option<PathBuf>,
    name: String,
    mime: String,
    handle: Option<Box<dyn Read + Send>>,
    close_on_complete: bool,
}

impl File {
    /// A file with an optional path and name; the name defaults to the
    /// path's file name and one of the two is required.
    pub fn new(path: Option<PathBuf>, name: Option<&str>) -> Result<Self> {
        let name = match (name, &path) {
            (Some(name), _) => name.to_string(),
            (None, Some(path)) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    SimbaError::Config(format!("Cannot derive a file name from {:?}", path))
                })?,
            (None, None) => anyhow::bail!(SimbaError::Config(
                "Name must be provided if path is not set".to_string()
            )),
        };
        Ok(Self {
            mime: guess_mime(&name),
            path,
            name,
            handle: None,
            close_on_complete: true,
        })
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(Some(path.into()), None)
    }

    /// A file whose content is read from an already open handle.
    pub fn from_reader(name: &str, reader: impl Read + Send + 'static) -> Self {
        Self {
            path: None,
            name: name.to_string(),
            mime: guess_mime(name),
            handle: Some(Box::new(reader)),
            close_on_complete: true,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_mime(mut self, mime: &str) -> Self {
        self.mime = mime.to_string();
        self
    }

    /// Leaves the handle open after the upload; the caller closes it.
    pub fn keep_open(mut self) -> Self {
        self.close_on_complete = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn close_on_complete(&self) -> bool {
        self.close_on_complete
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Opens the backing path if no handle is held yet.
    #[tracing::instrument(skip(self, runtime), fields(name = %self.name))]
    pub fn open(&mut self, runtime: &dyn Runtime) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let path = self.path.as_deref().ok_or_else(|| {
            SimbaError::Config(format!("File {} has neither a path nor a handle", self.name))
        })?;
        self.handle = Some(runtime.open(path)?);
        debug!("Opened {:?} for upload", path);
        Ok(())
    }

    /// Reads the remaining content of the open handle.
    pub fn read_contents(&mut self) -> Result<Vec<u8>> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| SimbaError::Config(format!("File {} is not open", self.name)))?;
        let mut contents = Vec::new();
        handle
            .read_to_end(&mut contents)
            .with_context(|| format!("Failed to read upload file {}", self.name))?;
        Ok(contents)
    }

    /// Hands the open handle over to the caller.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.handle.take()
    }

    /// Releases the handle unless the caller asked to keep it open.
    pub fn close(&mut self) {
        if self.close_on_complete && self.handle.take().is_some() {
            debug!("Closed upload file {}", self.name);
        }
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("open", &self.is_open())
            .field("close_on_complete", &self.close_on_complete)
            .finish()
    }
}

/// Ordered files sent together in one multipart body.
#[derive(Debug, Default)]
pub struct FileDict {
    files: Vec<File>,
}

impl FileDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `file`; files without a name are ignored.
    pub fn add(&mut self, file: File) -> &mut Self {
        if file.name.is_empty() {
            debug!("Skipping upload file without a name");
        } else {
            self.files.push(file);
        }
        self
    }

    pub fn with_file(mut self, file: File) -> Self {
        self.add(file);
        self
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut [File] {
        &mut self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn open(&mut self, runtime: &dyn Runtime) -> Result<()> {
        self.files.iter_mut().try_for_each(|f| f.open(runtime))
    }

    pub fn close(&mut self) {
        self.files.iter_mut().for_each(File::close);
    }
}

impl FromIterator<File> for FileDict {
    fn from_iter<I: IntoIterator<Item = File>>(iter: I) -> Self {
        let mut dict = FileDict::new();
        for file in iter {
            dict.add(file);
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::io::Cursor;

    #[test]
    fn test_name_and_mime_defaults() {
        let file = File::from_path("/data/manifest.json").unwrap();
        assert_eq!(file.name(), "manifest.json");
        assert_eq!(file.mime(), "application/json");
        assert!(file.close_on_complete());
        assert!(!file.is_open());

        let file = File::from_path("/data/blob.bin").unwrap();
        assert_eq!(file.mime(), DEFAULT_MIME);

        let file = File::new(Some("/data/photo.PNG".into()), Some("cover.jpg")).unwrap();
        assert_eq!(file.name(), "cover.jpg");
        assert_eq!(file.mime(), "image/jpeg");
    }

    #[test]
    fn test_mime_covers_uncommon_extensions() {
        assert_eq!(
            guess_mime("report.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_ne!(guess_mime("deploy.yaml"), DEFAULT_MIME);
        assert_eq!(guess_mime("notes.TXT"), "text/plain");
        assert_eq!(guess_mime("no_extension"), DEFAULT_MIME);
    }

    #[test]
    fn test_name_required_without_path() {
        let err = File::new(None, None).unwrap_err();
        assert!(matches!(err.downcast_ref::<SimbaError>(), Some(SimbaError::Config(_))));
    }

    #[test]
    fn test_open_is_lazy_and_close_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let mut file = File::from_path(&path).unwrap();
        assert!(!file.is_open());
        file.open(&RealRuntime).unwrap();
        assert!(file.is_open());
        assert_eq!(file.read_contents().unwrap(), b"hello");

        file.close();
        assert!(!file.is_open());
    }

    #[test]
    fn test_keep_open_leaves_handle_with_caller() {
        let mut file = File::from_reader("data.csv", Cursor::new(b"a,b".to_vec())).keep_open();
        assert_eq!(file.mime(), "text/csv");
        file.close();
        assert!(file.is_open());
        assert!(file.take_reader().is_some());
        assert!(!file.is_open());
    }

    #[test]
    fn test_reader_backed_file_does_not_touch_runtime() {
        let runtime = MockRuntime::new();
        let mut file = File::from_reader("a.txt", Cursor::new(b"x".to_vec()));
        file.open(&runtime).unwrap();
        assert_eq!(file.read_contents().unwrap(), b"x");
    }

    #[test]
    fn test_file_dict_skips_unnamed_and_keeps_order() {
        let dict: FileDict = [
            File::from_reader("b.txt", Cursor::new(Vec::new())),
            File::from_reader("", Cursor::new(Vec::new())),
            File::from_reader("a.txt", Cursor::new(Vec::new())),
        ]
        .into_iter()
        .collect();

        let names: Vec<&str> = dict.files().iter().map(File::name).collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
    }

    #[test]
    fn test_file_dict_open_failure() {
        let mut dict = FileDict::new().with_file(File::from_path("/nonexistent/x.txt").unwrap());
        assert!(dict.open(&RealRuntime).is_err());
        dict.close();
        assert!(!dict.files()[0].is_open());
    }
}
