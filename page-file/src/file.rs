//! A [`PageFile`] backed by a regular OS file, for desktop hosting and for
//! the `embeddb` recovery tests that need files to persist across an
//! explicit `close`/reopen.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{Error, ErrorType, OpenMode, PageFile};

/// Page file over a path on the host filesystem.
#[derive(Debug)]
pub struct StdPageFile {
    path: PathBuf,
    file: Option<File>,
    sticky_error: bool,
}

impl StdPageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            sticky_error: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> Result<&mut File, Error> {
        self.file.as_mut().ok_or_else(|| {
            self.sticky_error = true;
            Error::NotOpen
        })
    }

    fn map_io_err(&mut self, _e: io::Error) -> Error {
        self.sticky_error = true;
        Error::Io
    }
}

impl ErrorType for StdPageFile {
    type Error = Error;
}

impl PageFile for StdPageFile {
    // Callers needing a different page size wrap this type and validate the
    // buffer length they pass in; the on-disk layout has no fixed page size
    // of its own.
    const PAGE_SIZE: usize = 512;

    fn open(&mut self, mode: OpenMode) -> Result<bool, Self::Error> {
        let existed = self.path.exists() && self.path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true);
        if mode == OpenMode::ReadWriteTruncate {
            opts.truncate(true);
        }
        let f = opts.open(&self.path).map_err(|e| {
            self.sticky_error = true;
            let _ = e;
            Error::Io
        })?;
        self.file = Some(f);
        self.sticky_error = false;
        Ok(existed && mode == OpenMode::ReadWrite)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.file = None;
        Ok(())
    }

    fn read_page(&mut self, page_id: u32, out: &mut [u8]) -> Result<u32, Self::Error> {
        let offset = page_id as u64 * out.len() as u64;
        let f = self.file_mut()?;
        if f.seek(SeekFrom::Start(offset)).is_err() {
            self.sticky_error = true;
            return Err(Error::OutOfBounds);
        }
        let f = self.file_mut()?;
        match f.read_exact(out) {
            Ok(()) => Ok(1),
            Err(e) => Err(self.map_io_err(e)),
        }
    }

    fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<u32, Self::Error> {
        let offset = page_id as u64 * data.len() as u64;
        let f = self.file_mut()?;
        if f.seek(SeekFrom::Start(offset)).is_err() {
            self.sticky_error = true;
            return Err(Error::OutOfBounds);
        }
        let f = self.file_mut()?;
        match f.write_all(data) {
            Ok(()) => Ok(1),
            Err(e) => Err(self.map_io_err(e)),
        }
    }

    fn seek(&mut self, abs_byte_offset: u64) -> Result<(), Self::Error> {
        let f = self.file_mut()?;
        f.seek(SeekFrom::Start(abs_byte_offset))
            .map(|_| ())
            .map_err(|e| self.map_io_err(e))
    }

    fn tell(&mut self) -> Result<u64, Self::Error> {
        let f = self.file_mut()?;
        f.stream_position().map_err(|e| self.map_io_err(e))
    }

    fn read_rel(&mut self, out: &mut [u8]) -> Result<usize, Self::Error> {
        let f = self.file_mut()?;
        let mut total = 0;
        while total < out.len() {
            match f.read(&mut out[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => return Err(self.map_io_err(e)),
            }
        }
        Ok(total)
    }

    fn write_rel(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let f = self.file_mut()?;
        match f.write_all(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => Err(self.map_io_err(e)),
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        let f = self.file_mut()?;
        f.flush().map_err(|e| self.map_io_err(e))
    }

    fn error(&mut self) -> bool {
        self.sticky_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("page-file-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("data.bin");
        let mut f = StdPageFile::new(&path);
        f.open(OpenMode::ReadWriteTruncate).unwrap();
        f.write_page(0, &[5u8; 64]).unwrap();
        f.flush().unwrap();
        f.close().unwrap();

        let mut f2 = StdPageFile::new(&path);
        let existed = f2.open(OpenMode::ReadWrite).unwrap();
        assert!(existed);
        let mut out = [0u8; 64];
        f2.read_page(0, &mut out).unwrap();
        assert_eq!(out, [5u8; 64]);
        f2.close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
