//! # 索引节点层
//!
//! 内存索引节点表缓存正在使用的索引节点。表项有两把锁：
//!
//! - 表锁（自旋锁）保护所有表项的设备号、编号与引用计数；
//! - 每个表项的内容锁保护磁盘索引节点的副本，可以跨越磁盘读写持有。
//!
//! [`InodeRef`] 是一个引用：持有它即占用一份引用计数，
//! 析构时释放引用，若这是最后一个引用且链接数为零，就回收磁盘上的索引节点。
//! [`InodeGuard`] 是加了内容锁的引用，第一次加锁时从磁盘读入内容。
//!
//! 引用计数与磁盘上的链接数无关：一个已经没有目录项指向的文件，
//! 只要还有引用就不会被回收。

use alloc::boxed::Box;
use alloc::string::String;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};
use vfs::{Error, Stat};

use crate::FileSystem;
use crate::config::MAXPATH;
use crate::layout::{DiskInode, InodeKind};

#[derive(Debug, Default, Clone, Copy)]
struct Meta {
    dev: u32,
    inum: u32,
    refcnt: usize,
}

#[derive(Debug, Default)]
struct Slot {
    /// 副本是否已从磁盘读入
    valid: AtomicBool,
    disk_inode: Mutex<DiskInode>,
}

pub(crate) struct InodeTable {
    meta: Mutex<Box<[Meta]>>,
    slots: Box<[Slot]>,
}

impl InodeTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            meta: Mutex::new((0..capacity).map(|_| Meta::default()).collect()),
            slots: (0..capacity).map(|_| Slot::default()).collect(),
        }
    }

    /// 占用 `(dev, inum)` 的表项，已在表中则只增加引用计数
    fn bind(&self, dev: u32, inum: u32) -> usize {
        let mut meta = self.meta.lock();

        if let Some(index) = meta
            .iter()
            .position(|m| m.refcnt > 0 && m.dev == dev && m.inum == inum)
        {
            meta[index].refcnt += 1;
            return index;
        }

        let Some(index) = meta.iter().position(|m| m.refcnt == 0) else {
            panic!("iget: no inodes");
        };
        meta[index] = Meta {
            dev,
            inum,
            refcnt: 1,
        };
        self.slots[index].valid.store(false, Ordering::Release);
        index
    }

    pub(crate) fn live(&self) -> usize {
        self.meta.lock().iter().filter(|m| m.refcnt > 0).count()
    }

    pub(crate) fn ref_count(&self, dev: u32, inum: u32) -> usize {
        self.meta
            .lock()
            .iter()
            .find(|m| m.refcnt > 0 && m.dev == dev && m.inum == inum)
            .map_or(0, |m| m.refcnt)
    }
}

/// 未加锁的索引节点引用
pub struct InodeRef<'fs> {
    fs: &'fs FileSystem,
    index: usize,
    dev: u32,
    inum: u32,
}

impl<'fs> InodeRef<'fs> {
    pub(crate) fn bind(fs: &'fs FileSystem, dev: u32, inum: u32) -> Self {
        let index = fs.inodes.bind(dev, inum);
        Self {
            fs,
            index,
            dev,
            inum,
        }
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn inum(&self) -> u32 {
        self.inum
    }

    #[inline]
    pub fn fs(&self) -> &'fs FileSystem {
        self.fs
    }

    /// 加上内容锁，必要时从磁盘读入
    pub fn lock(self) -> InodeGuard<'fs> {
        let fs = self.fs;
        let slot = &fs.inodes.slots[self.index];
        let mut disk_inode = slot.disk_inode.lock();

        if !slot.valid.load(Ordering::Acquire) {
            *disk_inode = fs.disk_inode(self.dev, self.inum);
            assert!(!disk_inode.is_free(), "ilock: inode {} has no type", self.inum);
            slot.valid.store(true, Ordering::Release);
        }

        InodeGuard {
            inode: ManuallyDrop::new(self),
            disk_inode: ManuallyDrop::new(disk_inode),
        }
    }
}

impl Clone for InodeRef<'_> {
    fn clone(&self) -> Self {
        self.fs.inodes.meta.lock()[self.index].refcnt += 1;
        Self {
            fs: self.fs,
            index: self.index,
            dev: self.dev,
            inum: self.inum,
        }
    }
}

impl Drop for InodeRef<'_> {
    /// 释放引用。最后一个引用且链接数为零时截断文件并释放磁盘索引节点，
    /// 这会写盘，所以必须在事务中进行。
    fn drop(&mut self) {
        let table = &self.fs.inodes;
        let slot = &table.slots[self.index];
        let mut meta = table.meta.lock();

        if meta[self.index].refcnt == 1 && slot.valid.load(Ordering::Acquire) {
            // 引用计数为 1，没有其它持有者，内容锁必然空闲
            let Some(mut disk_inode) = slot.disk_inode.try_lock() else {
                panic!("iput: inode {} locked by its last reference", self.inum);
            };
            if disk_inode.nlink == 0 {
                drop(meta);

                disk_inode.clear(self.fs, self.dev);
                disk_inode.kind = 0;
                self.fs.write_inode(self.dev, self.inum, &disk_inode);
                slot.valid.store(false, Ordering::Release);
                drop(disk_inode);

                meta = table.meta.lock();
            }
        }

        meta[self.index].refcnt -= 1;
    }
}

/// 加了内容锁的索引节点，析构时解锁并释放引用
pub struct InodeGuard<'fs> {
    inode: ManuallyDrop<InodeRef<'fs>>,
    disk_inode: ManuallyDrop<MutexGuard<'fs, DiskInode>>,
}

impl<'fs> InodeGuard<'fs> {
    /// 只解锁，交还引用
    pub fn unlock(self) -> InodeRef<'fs> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: this 不会再被析构，两个字段各取出一次
        unsafe {
            ManuallyDrop::drop(&mut this.disk_inode);
            ManuallyDrop::take(&mut this.inode)
        }
    }

    #[inline]
    pub fn inode(&self) -> &InodeRef<'fs> {
        &self.inode
    }

    #[inline]
    pub fn inum(&self) -> u32 {
        self.inode.inum
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.inode.dev
    }

    #[inline]
    pub(crate) fn fs(&self) -> &'fs FileSystem {
        self.inode.fs
    }

    /// 把内存中的副本写入日志，每次修改之后都要调用
    pub fn update(&self) {
        self.fs().write_inode(self.dev(), self.inum(), &self.disk_inode);
    }

    pub fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        let (fs, dev) = (self.fs(), self.dev());
        self.disk_inode.read_at(offset, buf, fs, dev)
    }

    /// 写入之后总会更新索引节点，索引块可能已经变化
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> vfs::Result<usize> {
        let (fs, dev) = (self.fs(), self.dev());
        let written = self.disk_inode.write_at(offset, buf, fs, dev)?;
        self.update();
        Ok(written)
    }

    /// 丢弃全部内容
    pub fn truncate(&mut self) {
        let (fs, dev) = (self.fs(), self.dev());
        self.disk_inode.clear(fs, dev);
        self.update();
    }

    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev(),
            inode: self.inum(),
            ty: self.kind().map(Into::into).unwrap_or_default(),
            links: self.nlink,
            size: self.size as u64,
        }
    }

    /// 符号链接的目标：位于文件末尾的最后一条记录
    pub fn read_link(&mut self) -> vfs::Result<String> {
        if self.kind() != Some(InodeKind::Symlink) {
            return Err(Error::InvalidArgument);
        }
        let offset = (self.size as usize)
            .checked_sub(MAXPATH)
            .ok_or(Error::InvalidArgument)?;

        let mut record = [0; MAXPATH];
        if self.read_at(offset, &mut record) != MAXPATH {
            return Err(Error::InvalidArgument);
        }
        let len = record.iter().position(|&c| c == 0).unwrap_or(MAXPATH);
        core::str::from_utf8(&record[..len])
            .map(Into::into)
            .map_err(|_| Error::InvalidArgument)
    }
}

impl Deref for InodeGuard<'_> {
    type Target = DiskInode;

    fn deref(&self) -> &Self::Target {
        &self.disk_inode
    }
}

impl DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.disk_inode
    }
}

impl Drop for InodeGuard<'_> {
    fn drop(&mut self) {
        // 先解锁，再释放引用
        // SAFETY: 两个字段此后不再使用
        unsafe {
            ManuallyDrop::drop(&mut self.disk_inode);
            ManuallyDrop::drop(&mut self.inode);
        }
    }
}
