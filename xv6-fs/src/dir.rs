//! # 目录层
//!
//! 目录的内容是紧密排列、无序的 [`DirEntry`]，索引节点号为 0 的项是空位，
//! 删除只把索引节点号清零，从不压缩目录。

use alloc::string::String;
use alloc::vec::Vec;

use vfs::Error;

use crate::inode::{InodeGuard, InodeRef};
use crate::layout::DirEntry;

impl<'fs> InodeGuard<'fs> {
    /// 在目录中按名字查找，返回子项的引用（未加锁）及其目录项的偏移
    pub fn lookup(&mut self, name: &[u8]) -> Option<(InodeRef<'fs>, usize)> {
        assert!(self.is_dir(), "dirlookup: inode {} not a directory", self.inum());

        let size = self.size as usize;
        for offset in (0..size).step_by(DirEntry::SIZE) {
            let entry = self.entry_at(offset);
            if !entry.is_free() && entry.matches(name) {
                let inode = self.fs().inode(self.dev(), entry.inode_number());
                return Some((inode, offset));
            }
        }
        None
    }

    /// 写入新的目录项 `(name, inum)`，优先复用空位。必须在事务中调用。
    pub fn link(&mut self, name: &[u8], inum: u32) -> vfs::Result<()> {
        if self.lookup(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        let inum = u16::try_from(inum).map_err(|_| Error::InvalidArgument)?;

        let size = self.size as usize;
        let offset = (0..size)
            .step_by(DirEntry::SIZE)
            .find(|&offset| self.entry_at(offset).is_free())
            .unwrap_or(size);

        let entry = DirEntry::new(name, inum);
        match self.write_at(offset, entry.as_bytes()) {
            Ok(DirEntry::SIZE) => Ok(()),
            Ok(_) => Err(Error::NoSpace),
            Err(err) => Err(err),
        }
    }

    /// 清空偏移 `offset` 处的目录项。必须在事务中调用。
    pub fn remove_entry(&mut self, offset: usize) {
        let entry = DirEntry::default();
        let written = self.write_at(offset, entry.as_bytes());
        assert_eq!(written, Ok(DirEntry::SIZE), "unlink: cannot clear entry");
    }

    /// 除 `.` 与 `..` 外没有其它目录项
    pub fn is_empty_dir(&mut self) -> bool {
        let size = self.size as usize;
        (2 * DirEntry::SIZE..size)
            .step_by(DirEntry::SIZE)
            .all(|offset| self.entry_at(offset).is_free())
    }

    /// 列出全部有效目录项
    pub fn read_dir(&mut self) -> Vec<vfs::DirEntry> {
        assert!(self.is_dir(), "read_dir: inode {} not a directory", self.inum());

        let (fs, dev) = (self.fs(), self.dev());
        let size = self.size as usize;
        (0..size)
            .step_by(DirEntry::SIZE)
            .map(|offset| self.entry_at(offset))
            .filter(|entry| !entry.is_free())
            .map(|entry| {
                // 子项可能就是自己，不能加锁，直接读磁盘上的副本
                let disk_inode = fs.disk_inode(dev, entry.inode_number());
                vfs::DirEntry {
                    inode: entry.inode_number(),
                    ty: disk_inode.kind().map(Into::into).unwrap_or_default(),
                    name: String::from_utf8_lossy(entry.name()).into_owned(),
                }
            })
            .collect()
    }

    fn entry_at(&mut self, offset: usize) -> DirEntry {
        let mut entry = DirEntry::default();
        let read = self.read_at(offset, entry.as_bytes_mut());
        assert_eq!(read, DirEntry::SIZE, "dirlookup: short read");
        entry
    }
}
