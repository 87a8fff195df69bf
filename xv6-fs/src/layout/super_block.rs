use core::mem;

use crate::config::LOGSIZE;
use crate::layout::{DiskInode, IPB};
use crate::{BLOCK_BITS, MAGIC};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位其它连续区域
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据块数
    pub size: u32,
    /// 数据块数
    pub nblocks: u32,
    /// 索引节点数
    pub ninodes: u32,
    /// 日志区域块数（含日志头）
    pub nlog: u32,
    pub log_start: u32,
    pub inode_start: u32,
    pub bmap_start: u32,
}

impl SuperBlock {
    /// 按总块数与索引节点数规划各区域
    pub fn new(size: u32, ninodes: u32) -> Self {
        let nlog = LOGSIZE as u32;
        let ninodeblocks = ninodes / IPB as u32 + 1;
        let nbitmap = size / BLOCK_BITS as u32 + 1;
        let nmeta = 2 + nlog + ninodeblocks + nbitmap;
        assert!(size > nmeta, "mkfs: {size} blocks cannot hold {nmeta} metadata blocks");

        Self {
            magic: MAGIC,
            size,
            nblocks: size - nmeta,
            ninodes,
            nlog,
            log_start: 2,
            inode_start: 2 + nlog,
            bmap_start: 2 + nlog + ninodeblocks,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// 元数据（引导块到位图区域）占据的块数
    #[inline]
    pub fn meta_blocks(&self) -> u32 {
        self.size - self.nblocks
    }

    /// 通过编号获取索引节点在磁盘上的位置：**块号**以及**块内偏移**
    #[inline]
    pub fn inode_pos(&self, inum: u32) -> (u32, usize) {
        let block_id = self.inode_start + inum / IPB as u32;
        let offset = inum as usize % IPB * mem::size_of::<DiskInode>();
        (block_id, offset)
    }
}
