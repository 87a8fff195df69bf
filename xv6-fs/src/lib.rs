#![no_std]

extern crate alloc;

/* xv6 文件系统的整体架构，自上而下 */

// 组合操作层：创建、删除、链接、打开等系统调用级操作
mod ops;

// 路径解析层：多级路径与符号链接
mod path;

// 目录层：目录项的查找、插入与删除
mod dir;

// 索引节点层：内存索引节点表及其加锁协议
mod inode;

// 文件系统层：挂载、格式化、块与索引节点的分配
mod fs;

// 日志层：把多个块的修改打包成原子事务
mod journal;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓存层：分片加锁的磁盘块缓存
mod block_cache;

pub mod config;

use spin::Once;

pub use self::{
    block_cache::{BlockCache, BufGuard},
    fs::{FileSystem, FormatOptions},
    inode::{InodeGuard, InodeRef},
    journal::Op,
    layout::{
        DirEntry, DiskInode, InodeKind, SuperBlock, DIRSIZ, IPB, MAXFILE, NDIRECT, NINDIRECT,
    },
    ops::OpenFlag,
};
pub use block_dev::BlockDevice;

pub const MAGIC: u32 = 0x10203040;
pub const BLOCK_SIZE: usize = 1024;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;

pub type DataBlock = [u8; BLOCK_SIZE];

static FILE_SYSTEM: Once<FileSystem> = Once::new();

/// 安装内核唯一的文件系统实例，之后可通过 [`file_system`] 取得
pub fn init(fs: FileSystem) -> &'static FileSystem {
    assert!(FILE_SYSTEM.get().is_none(), "fs: initialised twice");
    FILE_SYSTEM.call_once(|| fs)
}

pub fn file_system() -> &'static FileSystem {
    FILE_SYSTEM.get().expect("fs: not initialised")
}
