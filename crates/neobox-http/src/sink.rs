//! Body Sinks
//!
//! Where the final response body goes: the response buffer, a file, a raw
//! writer that may abort, or a chunk callback.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::HttpError;

/// Raw writer. Returning fewer bytes than offered aborts the transfer.
pub type RawWriter<'a> = Box<dyn FnMut(&[u8]) -> usize + Send + 'a>;

/// Chunk callback used by asynchronous requests
pub type ChunkWriter = Box<dyn FnMut(&[u8]) + Send>;

pub(crate) enum BodySink<'a> {
    Buffer,
    File {
        path: PathBuf,
        writer: Option<BufWriter<File>>,
    },
    Raw(RawWriter<'a>),
    Chunks(ChunkWriter),
}

impl<'a> BodySink<'a> {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        BodySink::File {
            path: path.into(),
            writer: None,
        }
    }

    /// Called once the final hop's body is about to arrive. Files are only
    /// created here so redirect hops never touch the disk.
    pub fn begin(&mut self) -> Result<(), HttpError> {
        if let BodySink::File { path, writer } = self {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            *writer = Some(BufWriter::new(File::create(&*path)?));
            tracing::debug!("Writing body to {}", path.display());
        }
        Ok(())
    }

    /// Deliver one chunk. `written` is what the sink accepted before it.
    pub fn write(&mut self, chunk: &[u8], buffer: &mut Vec<u8>, written: u64) -> Result<(), HttpError> {
        match self {
            BodySink::Buffer => buffer.extend_from_slice(chunk),
            BodySink::File { writer, .. } => {
                if let Some(writer) = writer {
                    writer.write_all(chunk)?;
                }
            }
            BodySink::Raw(write) => {
                let consumed = write(chunk);
                if consumed < chunk.len() {
                    return Err(HttpError::WriteCallbackAborted {
                        written: written + consumed as u64,
                    });
                }
            }
            BodySink::Chunks(write) => write(chunk),
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), HttpError> {
        if let BodySink::File { writer: Some(writer), .. } = self {
            writer.flush()?;
        }
        Ok(())
    }
}
