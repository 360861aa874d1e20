//! Draining generated page output, spilling large pages to disk.

use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::db::Session;
use crate::db::statements::MAX_PAGE_LINES;
use crate::error::GatewayError;

/// The complete output of one procedure call.
#[derive(Debug)]
pub enum GeneratedOutput {
    Memory(Cursor<Vec<u8>>),
    /// Anonymous temporary file, already unlinked; gone once dropped.
    Spooled(File),
}

impl GeneratedOutput {
    pub fn is_spooled(&self) -> bool {
        matches!(self, GeneratedOutput::Spooled(_))
    }
}

impl Read for GeneratedOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            GeneratedOutput::Memory(cursor) => cursor.read(buf),
            GeneratedOutput::Spooled(file) => file.read(buf),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputStreamer {
    directory: PathBuf,
    threshold: usize,
}

impl OutputStreamer {
    pub fn new(directory: impl Into<PathBuf>, threshold: usize) -> Self {
        Self {
            directory: directory.into(),
            threshold,
        }
    }

    /// Fetch pages until the session reports a short page.
    ///
    /// Output stays in memory until its length exceeds the threshold; from
    /// then on it goes to a temporary file in the spool directory.
    pub fn drain(&self, session: &mut dyn Session) -> Result<GeneratedOutput, GatewayError> {
        let mut buffer = String::new();
        let mut spool: Option<BufWriter<File>> = None;
        let mut pages = 0usize;

        loop {
            let page = session.fetch_page(MAX_PAGE_LINES)?;
            pages += 1;
            if page.lines == 0 {
                break;
            }
            if let Some(text) = page.text {
                match spool.as_mut() {
                    Some(writer) => writer.write_all(text.as_bytes())?,
                    None => {
                        buffer.push_str(&text);
                        if buffer.len() > self.threshold {
                            spool = Some(self.start_spool(&buffer)?);
                            buffer = String::new();
                        }
                    }
                }
            }
            if page.lines < MAX_PAGE_LINES {
                break;
            }
        }

        match spool {
            Some(writer) => {
                let mut file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
                file.seek(SeekFrom::Start(0))?;
                tracing::debug!(pages, "Generated output spooled to disk");
                Ok(GeneratedOutput::Spooled(file))
            }
            None => {
                tracing::debug!(pages, bytes = buffer.len(), "Generated output held in memory");
                Ok(GeneratedOutput::Memory(Cursor::new(buffer.into_bytes())))
            }
        }
    }

    fn start_spool(&self, pending: &str) -> io::Result<BufWriter<File>> {
        tracing::info!(directory = %self.directory.display(), bytes = pending.len(), "Spooling large response to disk");
        let file = tempfile::tempfile_in(&self.directory)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(pending.as_bytes())?;
        Ok(writer)
    }
}
