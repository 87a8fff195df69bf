#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use xv6_fs::config::ROOTDEV;
use xv6_fs::{BLOCK_SIZE, BlockCache, BlockDevice, FileSystem, FormatOptions};

/// 内存中的块设备，记录读写次数
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; blocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// 每个块的首字节为块号的低 8 位
    pub fn patterned(blocks: usize) -> Arc<Self> {
        let disk = Self::new(blocks);
        for (id, block) in disk.blocks.lock().unwrap().iter_mut().enumerate() {
            block[0] = id as u8;
        }
        disk
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn block(&self, block_id: usize) -> [u8; BLOCK_SIZE] {
        self.blocks.lock().unwrap()[block_id]
    }

    pub fn set_block(&self, block_id: usize, data: &[u8]) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks[block_id].fill(0);
        blocks[block_id][..data.len()].copy_from_slice(data);
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        buf.copy_from_slice(&self.blocks.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blocks.lock().unwrap()[block_id].copy_from_slice(buf);
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn cache(disk: &Arc<RamDisk>) -> BlockCache {
    BlockCache::default().with_device(ROOTDEV, disk.clone())
}

/// 格式化一块 `size` 个块的内存盘
pub fn format(size: u32, inodes: u32) -> (Arc<RamDisk>, FileSystem) {
    init_logger();
    let disk = RamDisk::new(size as usize);
    let fs = FileSystem::format(cache(&disk), ROOTDEV, FormatOptions { size, inodes });
    (disk, fs)
}

/// 重新挂载同一块内存盘
pub fn remount(disk: &Arc<RamDisk>) -> FileSystem {
    FileSystem::mount(cache(disk), ROOTDEV)
}

/// 确定性的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
