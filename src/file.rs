use crate::config::FormParserConfig;
use crate::decoders::Sink;
use crate::error::Error;
use bytes::{Bytes, BytesMut};
use mime::Mime;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// An uploaded file streamed out of a multipart body.
///
/// Data accumulates in memory until it crosses the configured
/// `max_memory_file_size`, at which point it spills to a file on disk exactly
/// once. Generated spill files are removed when the `File` is dropped unless
/// the configuration says otherwise.
pub struct File {
    field_name: Option<Bytes>,
    file_name: Option<Bytes>,
    content_type: Option<Mime>,
    disposition: HashMap<Vec<u8>, Vec<u8>>,
    storage: FileStorage,
    actual_path: Option<PathBuf>,
    is_temp: bool,
    bytes_written: u64,
    config: FormParserConfig,
}

enum FileStorage {
    InMemory(BytesMut),
    OnDisk(fs::File),
}

static SPILL_COUNTER: AtomicU64 = AtomicU64::new(1);

impl File {
    pub(crate) fn new(
        file_name: Option<Bytes>,
        field_name: Option<Bytes>,
        content_type: Option<Mime>,
        disposition: HashMap<Vec<u8>, Vec<u8>>,
        config: &FormParserConfig,
    ) -> File {
        // IE-era browsers may send the full client-side path for
        // drive-letter (`C:\...`) or UNC (`\\host\...`) filenames; keep only
        // the last component for those. Anything else is left as sent.
        let file_name = file_name.map(|name| {
            let ie_path = (name.len() >= 3 && name[1] == b':' && name[2] == b'\\')
                || name.starts_with(b"\\\\");
            if ie_path {
                match memchr::memrchr(b'\\', &name) {
                    Some(pos) => name.slice(pos + 1..),
                    None => name,
                }
            } else {
                name
            }
        });

        File {
            field_name,
            file_name,
            content_type,
            disposition,
            storage: FileStorage::InMemory(BytesMut::new()),
            actual_path: None,
            is_temp: false,
            bytes_written: 0,
            config: config.clone(),
        }
    }

    /// The `name` parameter of the part's `Content-Disposition`.
    pub fn field_name(&self) -> Option<&[u8]> {
        self.field_name.as_deref()
    }

    /// The client-supplied filename. IE-style Windows paths are reduced to
    /// their final component; other names are kept as sent.
    pub fn file_name(&self) -> Option<&[u8]> {
        self.file_name.as_deref()
    }

    /// The part's `Content-Type`, when one was sent.
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// All `Content-Disposition` parameters of the part.
    pub fn disposition_params(&self) -> &HashMap<Vec<u8>, Vec<u8>> {
        &self.disposition
    }

    /// Total bytes written into this file.
    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the data still lives in memory.
    pub fn in_memory(&self) -> bool {
        matches!(self.storage, FileStorage::InMemory(_))
    }

    /// Path of the on-disk file after a spill, if one happened.
    pub fn actual_path(&self) -> Option<&Path> {
        self.actual_path.as_deref()
    }

    /// Appends a chunk of file data, spilling to disk when the in-memory
    /// buffer crosses the configured threshold.
    pub fn on_data(&mut self, data: &[u8]) -> crate::Result<usize> {
        match &mut self.storage {
            FileStorage::InMemory(buf) => {
                buf.extend_from_slice(data);
                self.bytes_written += data.len() as u64;
                if self.bytes_written > self.config.max_memory_file_size {
                    log::info!("upload exceeded in-memory threshold, spilling to disk");
                    self.flush_to_disk()?;
                }
            }
            FileStorage::OnDisk(file) => {
                file.write_all(data).map_err(spill_error)?;
                self.bytes_written += data.len() as u64;
            }
        }
        Ok(data.len())
    }

    /// Moves the in-memory buffer into a newly created disk file. No-op when
    /// already on disk.
    pub fn flush_to_disk(&mut self) -> crate::Result<()> {
        let buf = match &mut self.storage {
            FileStorage::InMemory(buf) => buf.split(),
            FileStorage::OnDisk(_) => {
                log::warn!("flush_to_disk called but the file is already on disk");
                return Ok(());
            }
        };

        let mut file = self.open_disk_file()?;
        file.write_all(&buf).map_err(spill_error)?;
        self.storage = FileStorage::OnDisk(file);
        Ok(())
    }

    fn open_disk_file(&mut self) -> crate::Result<fs::File> {
        let (base, ext) = split_extension(self.file_name.as_deref());

        if let (Some(dir), true, Some(base)) = (
            self.config.upload_dir.as_ref(),
            self.config.upload_keep_filename,
            base,
        ) {
            let mut name = base;
            if self.config.upload_keep_extensions {
                name.push_str(&ext);
            }
            let path = dir.join(name);
            log::info!("opening upload file at {}", path.display());
            let file = fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&path)
                .map_err(spill_error)?;
            self.actual_path = Some(path);
            self.is_temp = false;
            return Ok(file);
        }

        let dir = self
            .config
            .upload_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let suffix = if self.config.upload_keep_extensions {
            ext
        } else {
            String::new()
        };

        // Generated names can collide with files from other runs, so retry
        // with create_new until one sticks.
        for _ in 0..32 {
            let counter = SPILL_COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = dir.join(format!(
                "multiform-{}-{}{}",
                std::process::id(),
                counter,
                suffix
            ));
            match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
            {
                Ok(file) => {
                    log::info!("created upload spill file at {}", path.display());
                    self.actual_path = Some(path);
                    self.is_temp = true;
                    return Ok(file);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(spill_error(err)),
            }
        }

        Err(Error::File {
            message: "failed to allocate a unique spill file name".to_owned(),
        })
    }

    /// Flushes buffered data. Called when the part ends.
    pub fn on_end(&mut self) -> crate::Result<()> {
        if let FileStorage::OnDisk(file) = &mut self.storage {
            file.flush().map_err(spill_error)?;
        }
        Ok(())
    }

    /// Reads the complete contents back, from memory or from disk.
    pub fn bytes(&mut self) -> crate::Result<Bytes> {
        match &mut self.storage {
            FileStorage::InMemory(buf) => Ok(Bytes::copy_from_slice(buf)),
            FileStorage::OnDisk(file) => {
                file.flush().map_err(spill_error)?;
                let path = self.actual_path.as_ref().ok_or_else(|| Error::File {
                    message: "spill file path is unknown".to_owned(),
                })?;
                let data = fs::read(path).map_err(spill_error)?;
                Ok(Bytes::from(data))
            }
        }
    }
}

impl Sink for File {
    fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        self.on_data(data)
    }

    fn finalize(&mut self) -> crate::Result<()> {
        self.on_end()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.is_temp && self.config.upload_delete_tmp {
            if let Some(path) = self.actual_path.take() {
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("failed to remove spill file {}: {}", path.display(), err);
                    }
                }
            }
        }
    }
}

impl Debug for File {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .field("size", &self.bytes_written)
            .field("in_memory", &self.in_memory())
            .finish()
    }
}

fn spill_error(err: std::io::Error) -> Error {
    Error::File {
        message: err.to_string(),
    }
}

// Splits a client filename into a sanitized base and its extension
// (including the dot). Returns `None` for the base when no usable name
// exists.
fn split_extension(file_name: Option<&[u8]>) -> (Option<String>, String) {
    let name = match file_name {
        Some(name) if !name.is_empty() => String::from_utf8_lossy(name).into_owned(),
        _ => return (None, String::new()),
    };

    match name.rfind('.') {
        Some(dot) if dot > 0 => (Some(name[..dot].to_owned()), name[dot..].to_owned()),
        _ => (Some(name), String::new()),
    }
}
