//! Random-access cursor over one stored file.
//!
//! A session keeps at most one block in memory. Offsets map to
//! `(pointer / block_size, pointer % block_size)`; the buffer for the current
//! block grows on demand up to the block size and is written back when the
//! cursor leaves the block, on `flush`/`close`, or when the session is dropped.
//!
//! At most one session per file may be active; nothing here locks.

use std::io;

use bitflags::bitflags;
use log::{error, trace};

use crate::block::Block;
use crate::config::min_buffer_size;
use crate::entry::{FileEntry, FileType};
use crate::error::{VfsError, VfsResult};
use crate::store::FileEntryStore;

bitflags! {
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Every write lands at the current end of file.
        const APPEND = 1 << 2;
        /// Cut an existing file to zero length on open. Needs `WRITE`.
        const TRUNCATE = 1 << 3;
    }
}

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags::READ;
    pub const READ_WRITE: OpenFlags =
        OpenFlags::from_bits_truncate(OpenFlags::READ.bits() | OpenFlags::WRITE.bits());

    pub fn writable(&self) -> bool {
        self.contains(OpenFlags::WRITE)
    }
}

pub struct RandomAccessSession<'a> {
    store: &'a FileEntryStore,
    entry: FileEntry,
    flags: OpenFlags,
    block_size: u64,
    /// Index of the block the buffer belongs to.
    index: u64,
    /// `None` until the current block is touched.
    buffer: Option<Vec<u8>>,
    /// Stored block backing `buffer`; `None` while reading a sparse region.
    block: Option<Block>,
    dirty: bool,
    entry_dirty: bool,
    pointer: u64,
    closed: bool,
}

impl<'a> RandomAccessSession<'a> {
    pub(crate) fn open(
        store: &'a FileEntryStore,
        entry: FileEntry,
        flags: OpenFlags,
    ) -> VfsResult<Self> {
        if !flags.intersects(OpenFlags::READ | OpenFlags::WRITE) {
            return Err(VfsError::invalid("open needs READ or WRITE"));
        }
        if flags.contains(OpenFlags::TRUNCATE) && !flags.writable() {
            return Err(VfsError::invalid("TRUNCATE needs WRITE"));
        }
        match entry.file_type() {
            FileType::Folder => {
                return Err(VfsError::invalid(format!("{} is a folder", entry.path())))
            }
            FileType::Absent if !flags.writable() => {
                return Err(VfsError::NotFound(entry.path().to_string()))
            }
            _ => {}
        }
        let block_size = entry
            .block_size()
            .ok_or_else(|| VfsError::invalid(format!("{} has no block size", entry.path())))?
            as u64;
        let mut session = Self {
            store,
            entry,
            flags,
            block_size,
            index: 0,
            buffer: None,
            block: None,
            dirty: false,
            entry_dirty: false,
            pointer: 0,
            closed: false,
        };
        if flags.contains(OpenFlags::TRUNCATE) && session.entry.file_type() == FileType::File {
            session.set_length(0)?;
        }
        if flags.contains(OpenFlags::APPEND) {
            session.pointer = session.length();
        }
        trace!("opened {} with {:?}", session.entry.path(), flags);
        Ok(session)
    }

    pub fn path(&self) -> &str {
        self.entry.path()
    }

    /// Current absolute offset.
    pub fn position(&self) -> u64 {
        self.pointer
    }

    pub fn length(&self) -> u64 {
        self.entry.content_size()
    }

    /// Moves the cursor. Past-the-end positions are legal and do not change
    /// the length.
    pub fn seek(&mut self, pos: i64) -> VfsResult<()> {
        self.check_open()?;
        if pos < 0 {
            return Err(VfsError::invalid(format!("negative seek offset {pos}")));
        }
        self.pointer = pos as u64;
        self.move_to_pointer()
    }

    /// Advances up to `n` bytes, stopping at end of file. Returns the distance moved.
    pub fn skip(&mut self, n: u64) -> VfsResult<u64> {
        self.check_open()?;
        let target = self.pointer.saturating_add(n).min(self.length());
        if target <= self.pointer {
            return Ok(0);
        }
        let skipped = target - self.pointer;
        self.pointer = target;
        self.move_to_pointer()?;
        Ok(skipped)
    }

    /// Reads into `buf`, bounded by the content size. Returns 0 at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        self.check_open()?;
        let remaining = self.length().saturating_sub(self.pointer);
        let n = (buf.len() as u64).min(remaining) as usize;
        let mut done = 0;
        while done < n {
            self.move_to_pointer()?;
            self.load_for_read()?;
            let offset = self.buffer_offset();
            let chunk = (n - done).min(self.block_size as usize - offset);
            let out = &mut buf[done..done + chunk];
            let stored = match self.buffer.as_deref().and_then(|b| b.get(offset..)) {
                Some(src) => {
                    let k = src.len().min(chunk);
                    out[..k].copy_from_slice(&src[..k]);
                    k
                }
                None => 0,
            };
            // unwritten bytes inside the content size read as zero
            out[stored..].fill(0);
            done += chunk;
            self.pointer += chunk as u64;
        }
        Ok(n)
    }

    /// Writes all of `data` at the cursor, or at end of file under `APPEND`.
    pub fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(VfsError::ReadOnlyViolation(self.entry.path().to_string()));
        }
        if self.flags.contains(OpenFlags::APPEND) {
            self.pointer = self.length();
        }
        let mut done = 0;
        while done < data.len() {
            self.move_to_pointer()?;
            self.load_for_write()?;
            let offset = self.buffer_offset();
            let chunk = (data.len() - done).min(self.block_size as usize - offset);
            self.grow_buffer(offset + chunk);
            if let Some(buffer) = self.buffer.as_mut() {
                buffer[offset..offset + chunk].copy_from_slice(&data[done..done + chunk]);
            }
            self.dirty = true;
            done += chunk;
            self.pointer += chunk as u64;
            if self.pointer > self.length() {
                self.entry.set_content_size(self.pointer);
                self.entry_dirty = true;
            }
        }
        // the new length is visible to other units before the bytes are flushed;
        // on failure it stays dirty and the next flush retries
        if self.entry_dirty {
            self.store.put_entry(&mut self.entry)?;
            self.entry_dirty = false;
        }
        Ok(done)
    }

    /// Persists the current block if dirty, and the entry if its size moved.
    pub fn flush(&mut self) -> VfsResult<()> {
        if self.dirty {
            if let (Some(block), Some(buffer)) = (self.block.as_mut(), self.buffer.as_ref()) {
                let is_last = self.index + 1 == self.entry.block_count();
                let used = self
                    .entry
                    .content_size()
                    .saturating_sub(self.index * self.block_size)
                    .min(buffer.len() as u64) as usize;
                // a short tail block is stored without its padding
                block.content = if is_last && used as u64 <= self.block_size / 2 {
                    buffer[..used].to_vec()
                } else {
                    buffer.clone()
                };
                self.store.put_block(block)?;
                trace!("{}: flushed block {}", self.entry.path(), self.index);
            }
            self.dirty = false;
        }
        if self.entry_dirty {
            self.store.put_entry(&mut self.entry)?;
            self.entry_dirty = false;
        }
        Ok(())
    }

    /// Shrinks or grows the file. Growth is sparse; the new bytes read as zero.
    pub fn set_length(&mut self, len: u64) -> VfsResult<()> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(VfsError::ReadOnlyViolation(self.entry.path().to_string()));
        }
        self.flush()?;
        self.buffer = None;
        self.block = None;
        if self.entry.is_absent() {
            self.entry.make_file();
            self.store.store_new(&mut self.entry)?;
        }
        if len < self.length() {
            let last = len / self.block_size;
            self.store.delete_blocks_from(&mut self.entry, last)?;
            self.store
                .trim_block(&self.entry, last, (len % self.block_size) as usize)?;
            self.pointer = self.pointer.min(len);
        }
        self.entry.set_content_size(len);
        self.store.put_entry(&mut self.entry)?;
        self.entry_dirty = false;
        Ok(())
    }

    /// Flushes and ends the session. Further calls fail; closing twice is a no-op.
    pub fn close(&mut self) -> VfsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.buffer = None;
        self.block = None;
        self.closed = true;
        Ok(())
    }

    fn check_open(&self) -> VfsResult<()> {
        if self.closed {
            return Err(VfsError::invalid(format!(
                "session on {} is closed",
                self.entry.path()
            )));
        }
        Ok(())
    }

    fn buffer_offset(&self) -> usize {
        (self.pointer - self.index * self.block_size) as usize
    }

    /// Leaves the current block if the pointer has moved out of it.
    fn move_to_pointer(&mut self) -> VfsResult<()> {
        let target = self.pointer / self.block_size;
        if target != self.index {
            self.flush()?;
            self.buffer = None;
            self.block = None;
            self.index = target;
        }
        Ok(())
    }

    fn load_for_read(&mut self) -> VfsResult<()> {
        if self.buffer.is_some() {
            return Ok(());
        }
        if self.index < self.entry.block_count() {
            let block = self.store.get_block(&mut self.entry, self.index)?;
            self.buffer = Some(block.content.clone());
            self.block = Some(block);
        } else {
            // sparse region: nothing stored yet
            self.buffer = Some(Vec::new());
        }
        Ok(())
    }

    fn load_for_write(&mut self) -> VfsResult<()> {
        if self.block.is_some() {
            return Ok(());
        }
        let block = self.store.get_block(&mut self.entry, self.index)?;
        let mut content = block.content.clone();
        if let Some(sparse) = self.buffer.take() {
            if sparse.len() > content.len() {
                content = sparse;
            }
        }
        self.buffer = Some(content);
        self.block = Some(block);
        Ok(())
    }

    /// Grows the buffer to hold `needed` bytes: doubling, floored at the
    /// minimum buffer size, capped at the block size.
    fn grow_buffer(&mut self, needed: usize) {
        let block_size = self.block_size as usize;
        let buffer = self.buffer.get_or_insert_with(Vec::new);
        if needed <= buffer.len() {
            return;
        }
        let floor = min_buffer_size(block_size as u32);
        let new_len = (buffer.len() * 2).max(needed).max(floor).min(block_size);
        buffer.resize(new_len, 0);
    }
}

impl Drop for RandomAccessSession<'_> {
    fn drop(&mut self) {
        if self.closed || !(self.dirty || self.entry_dirty) {
            return;
        }
        if let Err(e) = self.flush() {
            error!("{}: flush on drop failed: {e}", self.entry.path());
        }
    }
}

impl io::Read for RandomAccessSession<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        RandomAccessSession::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for RandomAccessSession<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RandomAccessSession::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        RandomAccessSession::flush(self).map_err(io::Error::from)
    }
}

impl io::Seek for RandomAccessSession<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => i64::try_from(n).ok(),
            io::SeekFrom::End(d) => i64::try_from(self.length())
                .ok()
                .and_then(|len| len.checked_add(d)),
            io::SeekFrom::Current(d) => i64::try_from(self.pointer)
                .ok()
                .and_then(|pos| pos.checked_add(d)),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflows"))?;
        RandomAccessSession::seek(self, target).map_err(io::Error::from)?;
        Ok(self.pointer)
    }
}
