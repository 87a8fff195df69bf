use crate::block_cache::BlockCache;
use crate::journal::Journal;
use crate::{BLOCK_BITS, BLOCK_SIZE, DataBlock};

/// 位图区域内块的结构
type BitmapBlock = [u8; BLOCK_SIZE];

/// 空闲位图区域，每一位记录一个块是否已被占用。
///
/// 这里没有整体的分配锁，同一位图块上的修改由该块缓冲区的内容锁串行化。
#[derive(Debug, Clone, Copy)]
pub struct Bitmap {
    /// 位图的起始块
    start_block_id: u32,
    /// 位图所指示区域的总块数
    size: u32,
}

impl Bitmap {
    #[inline]
    pub fn new(start_block_id: u32, size: u32) -> Self {
        Self {
            start_block_id,
            size,
        }
    }

    /// 分配一个清零的新块并返回其块号。
    /// 若位图的空间用尽，则返回空。
    pub fn alloc(&self, cache: &BlockCache, journal: &Journal, dev: u32) -> Option<u32> {
        for base in (0..self.size).step_by(BLOCK_BITS) {
            let mut buf = cache.read(dev, self.block_of(base));
            let limit = (self.size - base).min(BLOCK_BITS as u32) as usize;

            // 第一个为 0 的位
            let Some(bit) = buf
                .data()
                .iter()
                .enumerate()
                .find_map(|(index, &byte)| {
                    (byte != u8::MAX).then_some(index * 8 + byte.trailing_ones() as usize)
                })
                .filter(|&bit| bit < limit)
            else {
                continue;
            };

            buf.map_mut(0, |bits: &mut BitmapBlock| bits[bit / 8] |= 1 << (bit % 8));
            journal.write(&buf);
            drop(buf);

            let block_id = base + bit as u32;
            let mut data = cache.read(dev, block_id);
            data.data_mut().fill(0);
            journal.write(&data);
            return Some(block_id);
        }

        log::warn!("balloc: out of blocks on dev {dev}");
        None
    }

    pub fn dealloc(&self, cache: &BlockCache, journal: &Journal, dev: u32, block_id: u32) {
        let mut buf = cache.read(dev, self.block_of(block_id));
        let bit = block_id as usize % BLOCK_BITS;
        let mask = 1 << (bit % 8);

        buf.map_mut(0, |bits: &mut BitmapBlock| {
            assert_ne!(bits[bit / 8] & mask, 0, "bfree: freeing free block {block_id}");
            bits[bit / 8] &= !mask;
        });
        journal.write(&buf);
    }

    /// 把前 `count` 个块标记为已占用并直接写回，仅在格式化时使用
    pub fn reserve(&self, cache: &BlockCache, dev: u32, count: u32) {
        for base in (0..count).step_by(BLOCK_BITS) {
            let mut buf = cache.read(dev, self.block_of(base));
            buf.map_mut(0, |bits: &mut BitmapBlock| {
                for bit in 0..(count - base).min(BLOCK_BITS as u32) as usize {
                    bits[bit / 8] |= 1 << (bit % 8);
                }
            });
            buf.writeback();
        }
    }

    /// 统计空闲块数
    pub fn count_free(&self, cache: &BlockCache, dev: u32) -> usize {
        (0..self.size)
            .step_by(BLOCK_BITS)
            .map(|base| {
                let limit = (self.size - base).min(BLOCK_BITS as u32) as usize;
                cache.read(dev, self.block_of(base)).map(0, |bits: &DataBlock| {
                    (0..limit).filter(|bit| bits[bit / 8] & (1 << (bit % 8)) == 0).count()
                })
            })
            .sum()
    }

    /// 块 `block_id` 对应的位所在的位图块
    #[inline]
    fn block_of(&self, block_id: u32) -> u32 {
        self.start_block_id + block_id / BLOCK_BITS as u32
    }
}
