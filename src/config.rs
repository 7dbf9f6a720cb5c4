use crate::constants;
use std::path::PathBuf;

/// Configuration for [`FormParser`](crate::FormParser) and the `File`
/// containers it creates.
#[derive(Debug, Clone)]
pub struct FormParserConfig {
    pub(crate) upload_dir: Option<PathBuf>,
    pub(crate) upload_keep_filename: bool,
    pub(crate) upload_keep_extensions: bool,
    pub(crate) upload_delete_tmp: bool,
    pub(crate) upload_error_on_bad_cte: bool,
    pub(crate) max_memory_file_size: u64,
    pub(crate) max_body_size: Option<u64>,
}

impl FormParserConfig {
    /// Creates the default configuration: spill files go to the system temp
    /// directory with generated names and are deleted on drop, uploads spill
    /// past 1 MiB, and the body size is unlimited.
    pub fn new() -> FormParserConfig {
        FormParserConfig::default()
    }

    /// Directory for spill files instead of the system temp directory.
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> FormParserConfig {
        self.upload_dir = Some(dir.into());
        self
    }

    /// Names the spill file after the client-supplied filename. Only honored
    /// together with [`upload_dir`](Self::upload_dir).
    pub fn upload_keep_filename(mut self, keep: bool) -> FormParserConfig {
        self.upload_keep_filename = keep;
        self
    }

    /// Keeps the client filename's extension when generating a spill-file
    /// name.
    pub fn upload_keep_extensions(mut self, keep: bool) -> FormParserConfig {
        self.upload_keep_extensions = keep;
        self
    }

    /// Whether generated spill files are removed when the `File` is dropped.
    pub fn upload_delete_tmp(mut self, delete: bool) -> FormParserConfig {
        self.upload_delete_tmp = delete;
        self
    }

    /// Fail on an unknown `Content-Transfer-Encoding` instead of passing the
    /// part data through undecoded.
    pub fn upload_error_on_bad_cte(mut self, error: bool) -> FormParserConfig {
        self.upload_error_on_bad_cte = error;
        self
    }

    /// Threshold in bytes past which a file's in-memory buffer spills to
    /// disk.
    pub fn max_memory_file_size(mut self, size: u64) -> FormParserConfig {
        self.max_memory_file_size = size;
        self
    }

    /// Hard cap on the total body size; exceeding it is a fatal parse error.
    pub fn max_body_size(mut self, size: u64) -> FormParserConfig {
        self.max_body_size = Some(size);
        self
    }
}

impl Default for FormParserConfig {
    fn default() -> FormParserConfig {
        FormParserConfig {
            upload_dir: None,
            upload_keep_filename: false,
            upload_keep_extensions: false,
            upload_delete_tmp: true,
            upload_error_on_bad_cte: false,
            max_memory_file_size: constants::DEFAULT_MAX_MEMORY_FILE_SIZE,
            max_body_size: None,
        }
    }
}
