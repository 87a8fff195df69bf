//! # 文件系统层
//!
//! 挂载、格式化，以及块与索引节点的分配。

use crate::block_cache::BlockCache;
use crate::config::{FSSIZE, NINODE, NINODES, ROOTINO};
use crate::inode::{InodeRef, InodeTable};
use crate::journal::{Journal, Op};
use crate::layout::*;

/// 格式化参数
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// 总块数
    pub size: u32,
    /// 索引节点数
    pub inodes: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            size: FSSIZE,
            inodes: NINODES,
        }
    }
}

pub struct FileSystem {
    pub(crate) dev: u32,
    pub(crate) sb: SuperBlock,
    pub(crate) cache: BlockCache,
    pub(crate) journal: Journal,
    pub(crate) bitmap: Bitmap,
    pub(crate) inodes: InodeTable,
}

impl FileSystem {
    /// 在设备 `dev` 上建立新的文件系统并挂载，根目录只含 `.` 与 `..`
    pub fn format(cache: BlockCache, dev: u32, options: FormatOptions) -> Self {
        assert!(options.inodes <= u16::MAX as u32, "mkfs: too many inodes");
        let sb = SuperBlock::new(options.size, options.inodes);
        log::info!(
            "mkfs dev {dev}: {} blocks, {} meta, {} log, {} inode blocks, {} data",
            sb.size,
            sb.meta_blocks(),
            sb.nlog,
            sb.bmap_start - sb.inode_start,
            sb.nblocks,
        );

        for block_id in 0..sb.size {
            let mut buf = cache.get(dev, block_id);
            buf.data_mut().fill(0);
            buf.writeback();
        }

        let mut buf = cache.get(dev, 1);
        buf.map_mut(0, |super_block: &mut SuperBlock| *super_block = sb);
        buf.writeback();
        drop(buf);

        Bitmap::new(sb.bmap_start, sb.size).reserve(&cache, dev, sb.meta_blocks());

        let fs = Self::mount(cache, dev);
        {
            let _op = fs.begin_op();
            let Some(root) = fs.alloc_inode(dev, InodeKind::Directory) else {
                panic!("mkfs: no inodes");
            };
            assert_eq!(root.inum(), ROOTINO);

            let mut root = root.lock();
            root.nlink = 1;
            root.update();
            let linked = root
                .link(b".", ROOTINO)
                .and_then(|_| root.link(b"..", ROOTINO));
            assert!(linked.is_ok(), "mkfs: cannot populate root directory");
        }
        fs
    }

    /// 挂载设备 `dev` 上的文件系统，内存索引节点表取默认容量
    pub fn mount(cache: BlockCache, dev: u32) -> Self {
        Self::mount_with(cache, dev, NINODE)
    }

    pub fn mount_with(cache: BlockCache, dev: u32, inodes: usize) -> Self {
        let sb = cache.read(dev, 1).map(0, |super_block: &SuperBlock| *super_block);
        assert!(sb.is_valid(), "fsinit: invalid file system on dev {dev}");

        let journal = Journal::open(&cache, dev, &sb);
        log::info!(
            "mounted dev {dev}: {} blocks, {} inodes, log at {}",
            sb.size,
            sb.ninodes,
            sb.log_start
        );

        Self {
            dev,
            bitmap: Bitmap::new(sb.bmap_start, sb.size),
            sb,
            cache,
            journal,
            inodes: InodeTable::new(inodes),
        }
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.sb
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// 开始一次文件系统操作，返回的守卫析构时结束操作
    pub fn begin_op(&self) -> Op<'_> {
        Op::begin(&self.journal, &self.cache)
    }

    /// 在事务中记录一次块修改
    #[inline]
    pub fn log_write(&self, buf: &crate::BufGuard<'_>) {
        self.journal.write(buf);
    }

    /// 分配一个清零的数据块，磁盘已满时返回空。必须在事务中调用。
    #[inline]
    pub fn alloc_block(&self, dev: u32) -> Option<u32> {
        self.bitmap.alloc(&self.cache, &self.journal, dev)
    }

    /// 释放数据块。必须在事务中调用。
    #[inline]
    pub fn free_block(&self, dev: u32, block_id: u32) {
        self.bitmap.dealloc(&self.cache, &self.journal, dev, block_id)
    }

    pub fn free_blocks(&self) -> usize {
        self.bitmap.count_free(&self.cache, self.dev)
    }

    /// 在磁盘上分配类型为 `kind` 的新索引节点，返回未加锁的引用。
    /// 索引节点区域耗尽时返回空。必须在事务中调用。
    pub fn alloc_inode(&self, dev: u32, kind: InodeKind) -> Option<InodeRef<'_>> {
        for inum in 1..self.sb.ninodes {
            let (block_id, offset) = self.sb.inode_pos(inum);
            let mut buf = self.cache.read(dev, block_id);
            let claimed = buf.map_mut(offset, |disk_inode: &mut DiskInode| {
                let free = disk_inode.is_free();
                if free {
                    disk_inode.init(kind);
                }
                free
            });
            if claimed {
                self.journal.write(&buf);
                drop(buf);
                return Some(self.inode(dev, inum));
            }
        }

        log::warn!("ialloc: no inodes on dev {dev}");
        None
    }

    /// 取得编号为 `inum` 的索引节点的引用，不读盘也不加锁
    pub fn inode(&self, dev: u32, inum: u32) -> InodeRef<'_> {
        InodeRef::bind(self, dev, inum)
    }

    pub fn root(&self) -> InodeRef<'_> {
        self.inode(self.dev, ROOTINO)
    }

    /// 内存索引节点表中被引用的项数
    pub fn live_inodes(&self) -> usize {
        self.inodes.live()
    }

    /// 索引节点 `(dev, inum)` 在内存表中的引用计数
    pub fn inode_ref_count(&self, dev: u32, inum: u32) -> usize {
        self.inodes.ref_count(dev, inum)
    }

    /// 经由缓存读取磁盘索引节点的当前内容，不经过内存索引节点表
    pub(crate) fn disk_inode(&self, dev: u32, inum: u32) -> DiskInode {
        let (block_id, offset) = self.sb.inode_pos(inum);
        self.cache
            .read(dev, block_id)
            .map(offset, |disk_inode: &DiskInode| *disk_inode)
    }

    /// 把内存中的索引节点写入日志
    pub(crate) fn write_inode(&self, dev: u32, inum: u32, disk_inode: &DiskInode) {
        let (block_id, offset) = self.sb.inode_pos(inum);
        let mut buf = self.cache.read(dev, block_id);
        buf.map_mut(offset, |on_disk: &mut DiskInode| *on_disk = *disk_inode);
        self.journal.write(&buf);
    }
}
