// Copyright 2020. The Quasar Development Community
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    fs,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ChainError;

const BLOCK_FILE_MAGIC: u32 = 0x51_53_42_4b; // "QSBK"
const RECORD_HEADER_SIZE: u32 = 8;

/// The append-only time-series file holding block bodies.
///
/// Each record is `magic(4) | length(4) | body`; files roll at `max_file_size` and are named by
/// ordinal. Offsets are immutable once published, so readers never race the appender.
pub struct BlockFile {
    dir: PathBuf,
    max_file_size: u32,
    current_no: u32,
    current_size: u32,
}

impl BlockFile {
    pub const DEFAULT_MAX_FILE_SIZE: u32 = 0x7f00_0000;

    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ChainError> {
        Self::with_max_file_size(dir, Self::DEFAULT_MAX_FILE_SIZE)
    }

    pub fn with_max_file_size(dir: impl AsRef<Path>, max_file_size: u32) -> Result<Self, ChainError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| ChainError::StorageError(e.to_string()))?;

        // resume appending to the highest existing ordinal
        let mut current_no = 1;
        while Self::file_path_for(&dir, current_no + 1).exists() {
            current_no += 1;
        }
        let current_size = match fs::metadata(Self::file_path_for(&dir, current_no)) {
            Ok(meta) => meta.len() as u32,
            Err(_) => 0,
        };
        Ok(Self {
            dir,
            max_file_size,
            current_no,
            current_size,
        })
    }

    fn file_path_for(dir: &Path, no: u32) -> PathBuf {
        dir.join(format!("block_{no:06}.dat"))
    }

    fn file_path(&self, no: u32) -> PathBuf {
        Self::file_path_for(&self.dir, no)
    }

    /// Append one block body, returning `(file ordinal, byte offset)` of the record.
    pub fn append(&mut self, body: &[u8]) -> Result<(u32, u32), ChainError> {
        let record_size = RECORD_HEADER_SIZE + body.len() as u32;
        if self.current_size > 0 && self.current_size + record_size > self.max_file_size {
            self.current_no += 1;
            self.current_size = 0;
        }
        let offset = self.current_size;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(self.current_no))
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        file.write_u32::<LittleEndian>(BLOCK_FILE_MAGIC)
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        file.write_u32::<LittleEndian>(body.len() as u32)
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        file.write_all(body)
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        file.flush().map_err(|e| ChainError::StorageError(e.to_string()))?;

        self.current_size += record_size;
        Ok((self.current_no, offset))
    }

    /// Read back the record at `(file_no, offset)`.
    pub fn read(&self, file_no: u32, offset: u32) -> Result<Vec<u8>, ChainError> {
        let mut file =
            File::open(self.file_path(file_no)).map_err(|e| ChainError::StorageError(e.to_string()))?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        let magic = file
            .read_u32::<LittleEndian>()
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        if magic != BLOCK_FILE_MAGIC {
            return Err(ChainError::StorageError(format!(
                "bad record magic {magic:#x} in block file {file_no} at {offset}"
            )));
        }
        let len = file
            .read_u32::<LittleEndian>()
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        let mut body = vec![0u8; len as usize];
        file.read_exact(&mut body)
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        Ok(body)
    }

    pub fn current_position(&self) -> (u32, u32) {
        (self.current_no, self.current_size)
    }
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn append_then_read() {
        let dir = tempdir().unwrap();
        let mut file = BlockFile::new(dir.path()).unwrap();
        let (no1, off1) = file.append(b"first block").unwrap();
        let (no2, off2) = file.append(b"second block").unwrap();
        assert_eq!((no1, off1), (1, 0));
        assert_eq!(no2, 1);
        assert_eq!(off2, 8 + 11);
        assert_eq!(file.read(no1, off1).unwrap(), b"first block");
        assert_eq!(file.read(no2, off2).unwrap(), b"second block");
    }

    #[test]
    fn rolls_to_next_ordinal_when_full() {
        let dir = tempdir().unwrap();
        let mut file = BlockFile::with_max_file_size(dir.path(), 64).unwrap();
        let body = [7u8; 40];
        let (no1, _) = file.append(&body).unwrap();
        let (no2, off2) = file.append(&body).unwrap();
        assert_eq!(no1, 1);
        assert_eq!(no2, 2);
        assert_eq!(off2, 0);
        assert_eq!(file.read(no2, off2).unwrap(), body.to_vec());
    }

    #[test]
    fn resumes_at_existing_tail() {
        let dir = tempdir().unwrap();
        let (no, off);
        {
            let mut file = BlockFile::new(dir.path()).unwrap();
            file.append(b"one").unwrap();
            (no, off) = file.append(b"two").unwrap();
        }
        let mut file = BlockFile::new(dir.path()).unwrap();
        assert_eq!(file.current_position(), (no, off + 8 + 3));
        let (no3, _) = file.append(b"three").unwrap();
        assert_eq!(no3, no);
        assert_eq!(file.read(no, off).unwrap(), b"two");
    }

    #[test]
    fn corrupt_magic_is_reported() {
        let dir = tempdir().unwrap();
        let mut file = BlockFile::new(dir.path()).unwrap();
        let (no, off) = file.append(b"block").unwrap();
        // a read at a misaligned offset must not be interpreted as a record
        assert!(file.read(no, off + 1).is_err());
    }
}
