//! # 组合操作层
//!
//! 供系统调用层直接使用的操作，每个操作自成一个事务。

use enumflags2::{BitFlags, bitflags};
use vfs::Error;

use crate::config::{MAX_SYMLINK_HOPS, MAXOPBLOCKS, MAXPATH};
use crate::inode::{InodeGuard, InodeRef};
use crate::layout::InodeKind;
use crate::{BLOCK_SIZE, FileSystem};

#[rustfmt::skip]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 文件不存在时创建
    CREATE    = 0b0000_0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC     = 0b0000_0100_0000_0000,
    /// 不跟随最后一个元素上的符号链接
    NOFOLLOW  = 0b0000_1000_0000_0000,
    /// 要求打开的是目录
    DIRECTORY = 0b0001_0000_0000_0000,
}

/// 单个事务最多写入的字节数：
/// 除去索引节点、索引块和两个位图块，剩下的块一半留给非对齐写入
const WRITE_CHUNK: usize = (MAXOPBLOCKS - 1 - 1 - 2) / 2 * BLOCK_SIZE;

impl FileSystem {
    /// 在 `path` 处创建类型为 `kind` 的新索引节点，返回加锁的索引节点。
    /// 请求普通文件而同名的文件或设备已存在时，直接返回已有的那个。
    pub fn create<'fs>(
        &'fs self,
        path: &str,
        kind: InodeKind,
        major: u16,
        minor: u16,
        cwd: Option<&InodeRef<'fs>>,
    ) -> vfs::Result<InodeGuard<'fs>> {
        let _op = self.begin_op();
        self.create_in_op(path, kind, major, minor, cwd)
    }

    /// 删除 `path` 处的目录项；链接数归零的索引节点在最后一个引用释放时回收
    pub fn unlink(&self, path: &str, cwd: Option<&InodeRef<'_>>) -> vfs::Result<()> {
        let _op = self.begin_op();

        let (parent, name) = self.resolve_parent(path, cwd)?;
        let mut dir = parent.lock();
        if name == b"." || name == b".." {
            return Err(Error::InvalidArgument);
        }

        let (child, offset) = dir.lookup(name).ok_or(Error::NotFound)?;
        let mut inode = child.lock();
        assert!(inode.nlink > 0, "unlink: inode {} has no links", inode.inum());
        if inode.is_dir() && !inode.is_empty_dir() {
            return Err(Error::DirectoryNotEmpty);
        }

        dir.remove_entry(offset);
        if inode.is_dir() {
            // 子目录的 `..`
            dir.nlink -= 1;
            dir.update();
        }
        drop(dir);

        inode.nlink -= 1;
        inode.update();
        Ok(())
    }

    /// 为 `old` 创建硬链接 `new`
    pub fn link(&self, old: &str, new: &str, cwd: Option<&InodeRef<'_>>) -> vfs::Result<()> {
        let _op = self.begin_op();

        let mut inode = self.resolve(old, cwd)?.lock();
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        inode.nlink += 1;
        inode.update();
        let inode = inode.unlock();

        let linked = self.resolve_parent(new, cwd).and_then(|(parent, name)| {
            let mut dir = parent.lock();
            if dir.dev() != inode.dev() {
                return Err(Error::InvalidArgument);
            }
            dir.link(name, inode.inum())
        });

        if linked.is_err() {
            let mut inode = inode.lock();
            inode.nlink -= 1;
            inode.update();
        }
        linked
    }

    /// 创建指向 `target` 的符号链接 `path`。
    /// 目标路径以定长记录的形式追加在文件末尾。
    pub fn symlink(&self, target: &str, path: &str, cwd: Option<&InodeRef<'_>>) -> vfs::Result<()> {
        if target.is_empty() || target.len() > MAXPATH {
            return Err(Error::InvalidArgument);
        }
        let mut record = [0; MAXPATH];
        record[..target.len()].copy_from_slice(target.as_bytes());

        let _op = self.begin_op();
        let mut inode = self.create_in_op(path, InodeKind::Symlink, 0, 0, cwd)?;
        let end = inode.size as usize;
        match inode.write_at(end, &record)? {
            MAXPATH => Ok(()),
            _ => Err(Error::NoSpace),
        }
    }

    /// 打开 `path`，返回其引用（未加锁）。
    /// 除非指定 [`OpenFlag::NOFOLLOW`]，最后一个元素上的符号链接会被逐层展开，
    /// 层数超过 [`MAX_SYMLINK_HOPS`] 时失败。
    pub fn open<'fs>(
        &'fs self,
        path: &str,
        flags: BitFlags<OpenFlag>,
        cwd: Option<&InodeRef<'fs>>,
    ) -> vfs::Result<InodeRef<'fs>> {
        let _op = self.begin_op();

        let mut inode = if flags.contains(OpenFlag::CREATE) {
            self.create_in_op(path, InodeKind::File, 0, 0, cwd)?.unlock()
        } else {
            self.resolve(path, cwd)?
        };

        let mut hops = 0;
        let mut guard = loop {
            let mut guard = inode.lock();
            if guard.kind() != Some(InodeKind::Symlink) || flags.contains(OpenFlag::NOFOLLOW) {
                break guard;
            }
            if hops == MAX_SYMLINK_HOPS {
                log::error!("open {path}: more than {MAX_SYMLINK_HOPS} symbolic links");
                return Err(Error::TooManyLinks);
            }
            hops += 1;

            let target = guard.read_link()?;
            drop(guard);
            inode = self.resolve(&target, cwd)?;
        };

        if flags.contains(OpenFlag::DIRECTORY) && !guard.is_dir() {
            return Err(Error::NotADirectory);
        }
        if flags.contains(OpenFlag::TRUNC) && guard.kind() == Some(InodeKind::File) {
            guard.truncate();
        }
        Ok(guard.unlock())
    }

    /// 从 `offset` 处写入 `data`，按事务容量分段提交。
    /// 某一段没有写满时停止，返回已写入的字节数。
    pub fn write_file(&self, inode: &InodeRef<'_>, offset: usize, data: &[u8]) -> vfs::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            let len = (data.len() - written).min(WRITE_CHUNK);
            let chunk = {
                let _op = self.begin_op();
                let mut guard = inode.clone().lock();
                guard.write_at(offset + written, &data[written..written + len])?
            };

            written += chunk;
            if chunk != len {
                break;
            }
        }
        Ok(written)
    }

    /// 从 `offset` 处读取，返回读到的字节数
    pub fn read_file(&self, inode: &InodeRef<'_>, offset: usize, buf: &mut [u8]) -> usize {
        inode.clone().lock().read_at(offset, buf)
    }
}

impl FileSystem {
    fn create_in_op<'fs>(
        &'fs self,
        path: &str,
        kind: InodeKind,
        major: u16,
        minor: u16,
        cwd: Option<&InodeRef<'fs>>,
    ) -> vfs::Result<InodeGuard<'fs>> {
        let (parent, name) = self.resolve_parent(path, cwd)?;
        let mut dir = parent.lock();

        if let Some((existing, _)) = dir.lookup(name) {
            drop(dir);
            let inode = existing.lock();
            return match (kind, inode.kind()) {
                (InodeKind::File, Some(InodeKind::File | InodeKind::Device)) => Ok(inode),
                _ => Err(Error::AlreadyExists),
            };
        }

        let Some(inode) = self.alloc_inode(dir.dev(), kind) else {
            return Err(Error::NoSpace);
        };
        let mut inode = inode.lock();
        inode.major = major;
        inode.minor = minor;
        inode.nlink = 1;
        inode.update();

        if let Err(err) = Self::attach(&mut dir, &mut inode, name) {
            // 链接数归零，释放时回收
            inode.nlink = 0;
            inode.update();
            return Err(err);
        }

        if inode.is_dir() {
            // 子目录的 `..`
            dir.nlink += 1;
            dir.update();
        }
        Ok(inode)
    }

    fn attach(dir: &mut InodeGuard<'_>, inode: &mut InodeGuard<'_>, name: &[u8]) -> vfs::Result<()> {
        if inode.is_dir() {
            let inum = inode.inum();
            inode.link(b".", inum)?;
            inode.link(b"..", dir.inum())?;
        }
        dir.link(name, inode.inum())
    }
}
