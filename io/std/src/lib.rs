// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Native collaborators for `xcore_io`: a `BlockDevice` backed by
//! `std::fs::File`, and an `IndexableMultiFileIo` backed by a directory of
//! native files. These are the default concrete implementations of the
//! "native directory enumeration and native random-access file open/read/
//! write/flush" collaborator the core requires (see the crate root's
//! Required Collaborators section); nothing in `xcore_fatx`/`xcore_svod`
//! depends on this crate directly.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom as StdSeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, error};
use xcore_err::{Error, Result};
use xcore_io::{BlockDevice, IndexableMultiFileIo, SeekFrom};

/// A `BlockDevice` backed by a single native file (or raw device node).
pub struct FileBlockDevice {
    file: File,
}

impl FileBlockDevice {
    /// Opens an existing file for random-access read/write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Creates (or truncates) a file for random-access read/write.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl BlockDevice for FileBlockDevice {
    fn set_position(&mut self, pos: SeekFrom) -> Result<()> {
        let std_pos = match pos {
            SeekFrom::Start(p) => StdSeekFrom::Start(p as u64),
            SeekFrom::Current(p) => StdSeekFrom::Current(p),
            SeekFrom::End(p) => StdSeekFrom::End(p),
        };
        self.file.seek(std_pos).map_err(|e| {
            error!("file device seek failed: {e}");
            Error::IoFailure(e)
        })?;
        Ok(())
    }

    fn position(&mut self) -> Result<i64> {
        Ok(self.file.stream_position()? as i64)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).map_err(|e| {
            error!("file device short read ({} bytes): {e}", buf.len());
            Error::IoFailure(e)
        })
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).map_err(|e| {
            error!("file device short write ({} bytes): {e}", buf.len());
            Error::IoFailure(e)
        })
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }
}

/// The sibling `<file_name>.data/` directory an SVOD root descriptor's data
/// files live under, e.g. `game.xex` → `game.xex.data/`.
pub fn data_directory_for(root_descriptor_path: impl AsRef<Path>) -> PathBuf {
    let path = root_descriptor_path.as_ref();
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".data");
    match path.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Opens the data-file directory next to `root_descriptor_path` as a
/// `DirectoryMultiFileIo`.
pub fn open_data_directory(root_descriptor_path: impl AsRef<Path>) -> Result<DirectoryMultiFileIo> {
    DirectoryMultiFileIo::open(data_directory_for(root_descriptor_path))
}

/// An `IndexableMultiFileIo` over a directory of native files, enumerated
/// once at construction in the order the OS returns them. Mirrors the
/// source's `LocalIndexableMultiFileIO`/`MultiFileIO`.
pub struct DirectoryMultiFileIo {
    paths: Vec<PathBuf>,
    current_index: usize,
    current_offset: u64,
    current: Option<File>,
}

impl DirectoryMultiFileIo {
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let entries = fs::read_dir(directory).map_err(|e| {
            error!("cannot enumerate data file directory {}: {e}", directory.display());
            Error::DirectoryMissing
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("cannot read directory entry under {}: {e}", directory.display());
                Error::DirectoryMissing
            })?;
            if entry.path().is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        if paths.is_empty() {
            error!("data file directory {} has no files", directory.display());
            return Err(Error::EmptyVolume);
        }

        let current = File::open(&paths[0])?;
        debug!("opened {} data files under {}", paths.len(), directory.display());

        Ok(Self {
            paths,
            current_index: 0,
            current_offset: 0,
            current: Some(current),
        })
    }

    fn current_file(&mut self) -> &mut File {
        self.current.as_mut().expect("file handle always present after open")
    }
}

impl IndexableMultiFileIo for DirectoryMultiFileIo {
    fn set_position(&mut self, offset: u64, file_index: Option<usize>) -> Result<()> {
        let switching = matches!(file_index, Some(i) if i != self.current_index);
        if switching {
            let index = file_index.unwrap();
            if index >= self.paths.len() {
                error!("file index {index} out of range (have {})", self.paths.len());
                return Err(Error::OutOfRange);
            }
            self.current = Some(File::open(&self.paths[index])?);
            self.current_index = index;
        }

        let len = self.current_file().metadata()?.len();
        if offset > len {
            error!("seek {offset} beyond file length {len} (file {})", self.current_index);
            return Err(Error::OutOfRange);
        }
        self.current_file().seek(StdSeekFrom::Start(offset))?;
        self.current_offset = offset;
        Ok(())
    }

    fn position(&self) -> (u64, usize) {
        (self.current_offset, self.current_index)
    }

    fn read_bytes(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let remaining = self.current_file_length()? - self.current_offset;
            let to_read = remaining.min(buf.len() as u64) as usize;
            if to_read == 0 {
                if self.current_index + 1 >= self.paths.len() {
                    error!("read past the last data file (index {})", self.current_index);
                    return Err(Error::OutOfRange);
                }
                self.set_position(0, Some(self.current_index + 1))?;
                continue;
            }
            let (head, tail) = buf.split_at_mut(to_read);
            self.current_file().read_exact(head)?;
            self.current_offset += to_read as u64;
            buf = tail;
        }
        Ok(())
    }

    fn write_bytes(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let remaining = self.current_file_length()? - self.current_offset;
            let to_write = remaining.min(buf.len() as u64) as usize;
            if to_write == 0 {
                if self.current_index + 1 >= self.paths.len() {
                    error!("write past the last data file (index {})", self.current_index);
                    return Err(Error::OutOfRange);
                }
                self.set_position(0, Some(self.current_index + 1))?;
                continue;
            }
            let (head, tail) = buf.split_at(to_write);
            self.current_file().write_all(head)?;
            self.current_offset += to_write as u64;
            buf = tail;
        }
        Ok(())
    }

    fn current_file_length(&mut self) -> Result<u64> {
        Ok(self.current_file().metadata()?.len())
    }

    fn file_count(&self) -> usize {
        self.paths.len()
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.current.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn file_block_device_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        {
            let mut dev = FileBlockDevice::create(&path).unwrap();
            dev.write_bytes(&[0u8; 16]).unwrap();
        }
        let mut dev = FileBlockDevice::open(&path).unwrap();
        dev.set_position(SeekFrom::Start(4)).unwrap();
        dev.write_u32(0x01020304).unwrap();
        dev.flush().unwrap();
        dev.set_position(SeekFrom::Start(4)).unwrap();
        assert_eq!(dev.read_u32().unwrap(), 0x01020304);
    }

    #[test]
    fn directory_multi_file_io_spans_files() {
        let dir = tempfile::tempdir().unwrap();
        for (i, contents) in [(0, b"AAAA".as_slice()), (1, b"BBBB".as_slice())] {
            let mut f = fs::File::create(dir.path().join(format!("Data{i:04}"))).unwrap();
            f.write_all(contents).unwrap();
        }

        let mut io = DirectoryMultiFileIo::open(dir.path()).unwrap();
        assert_eq!(io.file_count(), 2);

        io.set_position(2, Some(0)).unwrap();
        let mut buf = [0u8; 4];
        io.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"AABB");
        assert_eq!(io.position(), (2, 1));
    }

    #[test]
    fn empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(DirectoryMultiFileIo::open(dir.path()), Err(Error::EmptyVolume)));
    }

    #[test]
    fn data_directory_is_the_dot_data_sibling() {
        let derived = data_directory_for(Path::new("/games/title/game.xex"));
        assert_eq!(derived, Path::new("/games/title/game.xex.data"));
    }

    #[test]
    fn missing_directory_fails() {
        assert!(matches!(
            DirectoryMultiFileIo::open("/nonexistent/path/for/test"),
            Err(Error::DirectoryMissing)
        ));
    }
}
