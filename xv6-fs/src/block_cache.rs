//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的缓冲区，
//! 把即将操作的块复制到内存中，并尽量返回已缓存的块。
//!
//! 缓冲区按块号哈希到若干**分片**上，每个分片有自己的自旋锁和一条单向链表，
//! 不同分片上的请求互不阻塞。
//!
//! - 分片锁保护链表以及链表上缓冲区的簿记信息：设备号、块号、引用计数、后继；
//! - 每个缓冲区另有一把**内容锁**保护数据，可以跨越设备读写持有。
//!
//! 缓存未命中时，在持有目标分片锁的前提下按分片序寻找任意一个空闲缓冲区，
//! 对其它分片只**尝试**加锁，拿不到就跳过，所以不会出现循环等待；
//! 跳过了分片又没找到时，放开目标分片锁从头再来。
//! 这种回收策略并不维护最近使用顺序。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::mem::{self, ManuallyDrop};
use core::sync::atomic::{AtomicBool, Ordering};

use block_dev::BlockDevice;
use spin::{Mutex, MutexGuard};

use crate::config::{NBUCKET, NBUF};
use crate::{BLOCK_SIZE, DataBlock};

/// 缓冲区数据，按 8 字节对齐以便直接解释为磁盘数据结构
#[repr(C, align(8))]
struct BlockData(DataBlock);

/// 缓冲区在链表中的簿记信息，由其所在分片的锁保护
#[derive(Debug, Default, Clone, Copy)]
struct Link {
    /// 缓存的块，从未使用过的缓冲区为空
    ident: Option<(u32, u32)>,
    refcnt: usize,
    next: Option<usize>,
}

struct Buffer {
    /// 数据是否已从设备读入
    valid: AtomicBool,
    data: Mutex<BlockData>,
}

/// 分片：链表的表头，整个结构放在分片锁里
#[derive(Debug, Default)]
struct Shard {
    head: Option<usize>,
}

pub struct BlockCache {
    devices: Vec<(u32, Arc<dyn BlockDevice>)>,
    shards: Box<[Mutex<Shard>]>,
    links: Box<[UnsafeCell<Link>]>,
    buffers: Box<[Buffer]>,
}

// SAFETY: `links` 中的每一项只在持有其所在分片的锁时访问，
// 脱离链表的项只由把它摘下的线程访问。
unsafe impl Sync for BlockCache {}

impl BlockCache {
    /// 创建拥有 `buffers` 个缓冲区、`shards` 个分片的缓存。
    /// 一开始所有缓冲区都挂在 0 号分片上。
    pub fn new(buffers: usize, shards: usize) -> Self {
        assert!(buffers > 0 && shards > 0, "bcache: empty pool");

        let links = (0..buffers)
            .map(|index| {
                UnsafeCell::new(Link {
                    next: (index + 1 < buffers).then_some(index + 1),
                    ..Default::default()
                })
            })
            .collect();
        let shards = (0..shards)
            .map(|index| Mutex::new(Shard { head: (index == 0).then_some(0) }))
            .collect();
        let buffers = (0..buffers)
            .map(|_| Buffer {
                valid: AtomicBool::new(false),
                data: Mutex::new(BlockData([0; BLOCK_SIZE])),
            })
            .collect();

        Self {
            devices: Vec::new(),
            shards,
            links,
            buffers,
        }
    }

    /// 以设备号 `dev` 挂上一个块设备
    pub fn with_device(mut self, dev: u32, device: Arc<dyn BlockDevice>) -> Self {
        assert!(
            self.devices.iter().all(|(id, _)| *id != dev),
            "bcache: device {dev} attached twice"
        );
        self.devices.push((dev, device));
        self
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// 取得块 `(dev, block_id)` 的缓冲区并加上内容锁，数据不保证有效
    pub fn get(&self, dev: u32, block_id: u32) -> BufGuard<'_> {
        let target = self.shard_of(block_id);
        loop {
            let mut shard = self.shards[target].lock();

            // 同一个块只可能挂在目标分片上
            if let Some((_, index)) = self.find(&shard, |link| link.ident == Some((dev, block_id))) {
                // SAFETY: index 位于目标分片，已持有其锁
                let link = unsafe { self.link(index) };
                link.refcnt += 1;
                drop(shard);
                return self.lock_buffer(index, dev, block_id);
            }

            let mut contended = false;
            for source in 0..self.shards.len() {
                if source == target {
                    if let Some((_, index)) = self.find(&shard, |link| link.refcnt == 0) {
                        self.claim(index, dev, block_id);
                        drop(shard);
                        return self.lock_buffer(index, dev, block_id);
                    }
                    continue;
                }

                // 已经持有目标分片锁，其它分片只能尝试加锁
                let Some(mut other) = self.shards[source].try_lock() else {
                    contended = true;
                    continue;
                };
                let Some((prev, index)) = self.find(&other, |link| link.refcnt == 0) else {
                    continue;
                };
                self.claim(index, dev, block_id);
                self.unlink(&mut other, prev, index);
                drop(other);

                // SAFETY: index 已脱离原链表，只有本线程能访问
                let link = unsafe { self.link(index) };
                link.next = shard.head;
                shard.head = Some(index);
                drop(shard);

                log::trace!("bget: buffer {index} moved from shard {source} to {target}");
                return self.lock_buffer(index, dev, block_id);
            }

            if !contended {
                panic!("bget: no buffers");
            }
            // 有分片没能检查，放开目标分片锁重来
            drop(shard);
            core::hint::spin_loop();
        }
    }

    /// 取得块 `(dev, block_id)` 的缓冲区，必要时从设备读入
    pub fn read(&self, dev: u32, block_id: u32) -> BufGuard<'_> {
        let mut buf = self.get(dev, block_id);
        let valid = &self.buffers[buf.index].valid;
        if !valid.load(Ordering::Acquire) {
            self.device(dev).read_block(block_id as usize, &mut buf.data.0);
            valid.store(true, Ordering::Release);
        }
        buf
    }

    /// 块 `(dev, block_id)` 当前的引用计数，未缓存时为 0
    pub fn ref_count(&self, dev: u32, block_id: u32) -> usize {
        let shard = self.shards[self.shard_of(block_id)].lock();
        self.find(&shard, |link| link.ident == Some((dev, block_id)))
            // SAFETY: 已持有所在分片的锁
            .map_or(0, |(_, index)| unsafe { self.link(index) }.refcnt)
    }
}

impl BlockCache {
    #[inline]
    fn shard_of(&self, block_id: u32) -> usize {
        block_id as usize % self.shards.len()
    }

    fn device(&self, dev: u32) -> &dyn BlockDevice {
        self.devices
            .iter()
            .find_map(|(id, device)| (*id == dev).then_some(device.as_ref()))
            .unwrap_or_else(|| panic!("bcache: unknown device {dev}"))
    }

    /// # Safety
    ///
    /// 调用者必须持有 `index` 所在分片的锁，或者 `index` 已被调用者摘下。
    #[allow(clippy::mut_from_ref)]
    unsafe fn link(&self, index: usize) -> &mut Link {
        unsafe { &mut *self.links[index].get() }
    }

    /// 在分片链表上找到第一个满足条件的缓冲区，返回（前驱，自身）
    fn find(&self, shard: &Shard, pred: impl Fn(&Link) -> bool) -> Option<(Option<usize>, usize)> {
        let mut prev = None;
        let mut cursor = shard.head;
        while let Some(index) = cursor {
            // SAFETY: 调用者持有 shard 的锁
            let link = unsafe { self.link(index) };
            if pred(link) {
                return Some((prev, index));
            }
            prev = cursor;
            cursor = link.next;
        }
        None
    }

    fn unlink(&self, shard: &mut Shard, prev: Option<usize>, index: usize) {
        // SAFETY: 调用者持有 shard 的锁，prev 与 index 都在其链表上
        let next = unsafe { self.link(index) }.next.take();
        match prev {
            Some(prev) => {
                let prev = unsafe { self.link(prev) };
                prev.next = next;
            }
            None => shard.head = next,
        }
    }

    /// 把空闲缓冲区改绑到新的块上
    fn claim(&self, index: usize, dev: u32, block_id: u32) {
        // SAFETY: 调用者持有 index 所在分片的锁
        let link = unsafe { self.link(index) };
        link.ident = Some((dev, block_id));
        link.refcnt = 1;
        self.buffers[index].valid.store(false, Ordering::Release);
    }

    fn lock_buffer(&self, index: usize, dev: u32, block_id: u32) -> BufGuard<'_> {
        BufGuard {
            cache: self,
            index,
            dev,
            block_id,
            data: ManuallyDrop::new(self.buffers[index].data.lock()),
        }
    }

    /// 在分片锁下调整引用计数
    fn adjust(&self, index: usize, block_id: u32, f: impl FnOnce(&mut usize)) {
        let _shard = self.shards[self.shard_of(block_id)].lock();
        // SAFETY: 被引用的缓冲区不会被回收，因而一直挂在 block_id 对应的分片上
        let link = unsafe { self.link(index) };
        f(&mut link.refcnt);
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(NBUF, NBUCKET)
    }
}

/// 持有内容锁的缓冲区，析构时解锁并减少引用计数
pub struct BufGuard<'a> {
    cache: &'a BlockCache,
    index: usize,
    dev: u32,
    block_id: u32,
    data: ManuallyDrop<MutexGuard<'a, BlockData>>,
}

impl BufGuard<'_> {
    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    /// 缓冲区在池中的位置
    #[inline]
    pub fn slot(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn data(&self) -> &DataBlock {
        &self.data.0
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut DataBlock {
        &mut self.data.0
    }

    /// 同步写回设备
    pub fn writeback(&self) {
        self.cache
            .device(self.dev)
            .write_block(self.block_id as usize, &self.data.0);
    }

    /// 增加引用计数，使缓冲区在释放后仍不会被回收
    pub fn pin(&self) {
        self.cache.adjust(self.index, self.block_id, |refcnt| *refcnt += 1);
    }

    pub fn unpin(&self) {
        self.cache.adjust(self.index, self.block_id, |refcnt| {
            assert!(*refcnt > 1, "bunpin: buffer not pinned");
            *refcnt -= 1;
        });
    }

    pub(crate) fn get<T: Sized>(&self, offset: usize) -> &T {
        Self::check::<T>(offset);
        // SAFETY: 范围与对齐已检查，磁盘数据结构都是纯整数组成的 repr(C) 类型
        unsafe { &*self.data.0.as_ptr().add(offset).cast() }
    }

    pub(crate) fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        Self::check::<T>(offset);
        // SAFETY: 同上
        unsafe { &mut *self.data.0.as_mut_ptr().add(offset).cast() }
    }

    #[inline]
    pub(crate) fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub(crate) fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    fn check<T>(offset: usize) {
        assert!(mem::size_of::<T>() + offset <= BLOCK_SIZE);
        assert_eq!(offset % mem::align_of::<T>(), 0);
    }
}

impl Drop for BufGuard<'_> {
    fn drop(&mut self) {
        // 先释放内容锁，再到分片锁下减少引用计数
        // SAFETY: data 此后不再使用
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.adjust(self.index, self.block_id, |refcnt| {
            assert!(*refcnt > 0, "brelse: buffer not referenced");
            *refcnt -= 1;
        });
    }
}
