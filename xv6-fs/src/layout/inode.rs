//! 磁盘索引节点与多级块索引
//!
//! - 直接索引：`addrs` 的前 [`NDIRECT`] 项直接存放数据块号；
//! - 一级间接：`addrs[NDIRECT]` 指向一个索引块，整块连续存储数据块号；
//! - 二级间接：`addrs[NDIRECT + 1]` 指向一个索引块，其中每一项指向一个一级索引块。
//!
//! 块号为 0 表示尚未分配，数据块在第一次访问时才分配。
//!
//! ## 块索引编码
//!
//! 剔去直接索引与一级间接的部分后，
//! 逻辑索引除以 [`NINDIRECT`] 得到二级索引块中的位置，取模得到一级索引块中的位置。

use core::mem;

use vfs::{DirEntryType, Error};

use crate::{BLOCK_SIZE, DataBlock, FileSystem};

/// 直接索引的块数
pub const NDIRECT: usize = 11;
/// 间接索引块的编号容量
pub const NINDIRECT: usize = BLOCK_SIZE / mem::size_of::<u32>();
/// 二级间接索引可编号数量
pub const NDINDIRECT: usize = NINDIRECT * NINDIRECT;
/// 单个文件的最大块数
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NDINDIRECT;
/// 每块容纳的索引节点数
pub const IPB: usize = BLOCK_SIZE / mem::size_of::<DiskInode>();

/// 间接索引块
pub type IndirectBlock = [u32; NINDIRECT];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DiskInode {
    /// 类型，0 表示空闲
    pub kind: u16,
    /// 设备文件的主设备号
    pub major: u16,
    /// 设备文件的次设备号
    pub minor: u16,
    /// 硬链接个数
    pub nlink: u16,
    // 不用usize是为了严控布局
    pub size: u32,
    pub addrs: [u32; NDIRECT + 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeKind {
    Directory = 1,
    File = 2,
    Device = 3,
    Symlink = 4,
}

impl TryFrom<u16> for InodeKind {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Directory),
            2 => Ok(Self::File),
            3 => Ok(Self::Device),
            4 => Ok(Self::Symlink),
            _ => Err(Error::InvalidArgument),
        }
    }
}

impl From<InodeKind> for DirEntryType {
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::Directory => Self::Directory,
            InodeKind::File => Self::Regular,
            InodeKind::Device => Self::Char,
            InodeKind::Symlink => Self::SymLink,
        }
    }
}

impl DiskInode {
    #[inline]
    pub fn init(&mut self, kind: InodeKind) {
        *self = Self {
            kind: kind as u16,
            ..Default::default()
        }
    }

    #[inline]
    pub fn kind(&self) -> Option<InodeKind> {
        InodeKind::try_from(self.kind).ok()
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind == 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(InodeKind::Directory)
    }

    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引），
    /// 返回给**块缓存层**使用的块号。缺失的数据块与索引块会被分配；
    /// 磁盘空间耗尽时返回空，已经分配的结构保持不变。
    pub(crate) fn block_id(&mut self, index: usize, fs: &FileSystem, dev: u32) -> Option<u32> {
        if index < NDIRECT {
            return Self::slot_or_alloc(&mut self.addrs[index], fs, dev);
        }

        // 剔去直接索引的部分
        let index = index - NDIRECT;
        if index < NINDIRECT {
            let table = Self::slot_or_alloc(&mut self.addrs[NDIRECT], fs, dev)?;
            return Self::entry_or_alloc(table, index, fs, dev);
        }

        // 剔去一级间接的部分
        let index = index - NINDIRECT;
        assert!(index < NDINDIRECT, "bmap: out of range");
        let top = Self::slot_or_alloc(&mut self.addrs[NDIRECT + 1], fs, dev)?;
        let table = Self::entry_or_alloc(top, index / NINDIRECT, fs, dev)?;
        Self::entry_or_alloc(table, index % NINDIRECT, fs, dev)
    }

    /// 释放全部数据块与索引块，大小归零。不负责写回索引节点。
    pub(crate) fn clear(&mut self, fs: &FileSystem, dev: u32) {
        for slot in self.addrs[..NDIRECT].iter_mut().filter(|slot| **slot != 0) {
            fs.free_block(dev, *slot);
            *slot = 0;
        }

        let table = mem::take(&mut self.addrs[NDIRECT]);
        if table != 0 {
            Self::free_table(table, fs, dev);
            fs.free_block(dev, table);
        }

        let top = mem::take(&mut self.addrs[NDIRECT + 1]);
        if top != 0 {
            for &table in Self::entries(top, fs, dev).iter().filter(|&&id| id != 0) {
                Self::free_table(table, fs, dev);
                fs.free_block(dev, table);
            }
            fs.free_block(dev, top);
        }

        self.size = 0;
    }

    /// 从 `offset` 处读取，长度截断到文件末尾。
    /// `offset` 越过文件末尾或者范围溢出时读不到任何字节。
    pub(crate) fn read_at(&mut self, offset: usize, buf: &mut [u8], fs: &FileSystem, dev: u32) -> usize {
        let size = self.size as usize;
        let Some(end) = offset.checked_add(buf.len()) else {
            return 0;
        };
        if offset > size {
            return 0;
        }
        let end = end.min(size);

        let mut pos = offset;
        let mut read = 0;
        while pos < end {
            let Some(block_id) = self.block_id(pos / BLOCK_SIZE, fs, dev) else {
                break;
            };
            let start = pos % BLOCK_SIZE;
            let len = (end - pos).min(BLOCK_SIZE - start);
            fs.cache.read(dev, block_id).map(0, |data: &DataBlock| {
                buf[read..read + len].copy_from_slice(&data[start..start + len]);
            });
            pos += len;
            read += len;
        }

        read
    }

    /// 写入 `offset` 处，必要时扩大文件。必须在事务中调用。
    /// 磁盘空间耗尽时提前停止，返回已写入的字节数。
    pub(crate) fn write_at(
        &mut self,
        offset: usize,
        buf: &[u8],
        fs: &FileSystem,
        dev: u32,
    ) -> vfs::Result<usize> {
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidArgument)?;
        if offset > self.size as usize {
            return Err(Error::InvalidArgument);
        }
        if end > MAXFILE * BLOCK_SIZE {
            return Err(Error::FileTooLarge);
        }

        let mut pos = offset;
        let mut written = 0;
        while pos < end {
            let Some(block_id) = self.block_id(pos / BLOCK_SIZE, fs, dev) else {
                break;
            };
            let start = pos % BLOCK_SIZE;
            let len = (end - pos).min(BLOCK_SIZE - start);
            let mut data = fs.cache.read(dev, block_id);
            data.data_mut()[start..start + len].copy_from_slice(&buf[written..written + len]);
            fs.journal.write(&data);
            pos += len;
            written += len;
        }

        if pos > self.size as usize {
            self.size = pos as u32;
        }
        Ok(written)
    }
}

impl DiskInode {
    fn slot_or_alloc(slot: &mut u32, fs: &FileSystem, dev: u32) -> Option<u32> {
        if *slot == 0 {
            *slot = fs.alloc_block(dev)?;
        }
        Some(*slot)
    }

    /// 读取索引块 `table` 的第 `index` 项，为零时分配新块并把索引块记入日志
    fn entry_or_alloc(table: u32, index: usize, fs: &FileSystem, dev: u32) -> Option<u32> {
        let mut buf = fs.cache.read(dev, table);
        let block_id = buf.map(0, |entries: &IndirectBlock| entries[index]);
        if block_id != 0 {
            return Some(block_id);
        }

        let block_id = fs.alloc_block(dev)?;
        buf.map_mut(0, |entries: &mut IndirectBlock| entries[index] = block_id);
        fs.journal.write(&buf);
        Some(block_id)
    }

    fn entries(table: u32, fs: &FileSystem, dev: u32) -> IndirectBlock {
        fs.cache.read(dev, table).map(0, |entries: &IndirectBlock| *entries)
    }

    /// 释放索引块 `table` 所指的全部数据块，不包括它自己
    fn free_table(table: u32, fs: &FileSystem, dev: u32) {
        for &block_id in Self::entries(table, fs, dev).iter().filter(|&&id| id != 0) {
            fs.free_block(dev, block_id);
        }
    }
}
