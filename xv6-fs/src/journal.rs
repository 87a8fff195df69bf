//! # 日志层
//!
//! 一次文件系统操作往往要修改多个块，中途崩溃会留下不一致的磁盘。
//! 日志把一个或多个操作的修改打包成事务：
//!
//! 1. 操作期间的修改只记录块号并钉住缓冲区，不直接写盘；
//! 2. 最后一个操作结束时提交：先把修改过的块复制到日志区域，
//!    再写日志头，写完日志头即为提交点；
//! 3. 把日志中的块安装到原位置，最后清空日志头。
//!
//! 挂载时若日志头非空，说明上次提交后安装未完成，重新安装一遍即可。

use core::hint;
use core::mem;

use spin::Mutex;

use crate::block_cache::{BlockCache, BufGuard};
use crate::config::{LOGSIZE, MAXOPBLOCKS};
use crate::layout::SuperBlock;
use crate::BLOCK_SIZE;

const _: () = assert!(mem::size_of::<LogHeader>() <= BLOCK_SIZE);

/// 日志头，既在内存中记录当前事务，也是日志区域第一块的磁盘格式
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct LogHeader {
    n: u32,
    blocks: [u32; LOGSIZE],
}

impl LogHeader {
    const EMPTY: Self = Self {
        n: 0,
        blocks: [0; LOGSIZE],
    };

    #[inline]
    fn blocks(&self) -> &[u32] {
        &self.blocks[..self.n as usize]
    }
}

#[derive(Debug)]
struct State {
    /// 正在进行的操作数
    outstanding: usize,
    committing: bool,
    header: LogHeader,
}

#[derive(Debug)]
pub struct Journal {
    dev: u32,
    start: u32,
    size: u32,
    state: Mutex<State>,
}

impl Journal {
    /// 打开设备上的日志并完成崩溃恢复
    pub(crate) fn open(cache: &BlockCache, dev: u32, sb: &SuperBlock) -> Self {
        let journal = Self {
            dev,
            start: sb.log_start,
            size: sb.nlog,
            state: Mutex::new(State {
                outstanding: 0,
                committing: false,
                header: LogHeader::EMPTY,
            }),
        };
        journal.recover(cache);
        journal
    }

    /// 开始一个操作，日志可能放不下时等待
    pub(crate) fn begin(&self) {
        loop {
            let mut state = self.state.lock();
            let reserved = (state.outstanding + 1) * MAXOPBLOCKS;
            if !state.committing && state.header.n as usize + reserved <= LOGSIZE {
                state.outstanding += 1;
                return;
            }
            drop(state);
            hint::spin_loop();
        }
    }

    /// 结束一个操作，最后一个结束的操作负责提交
    pub(crate) fn end(&self, cache: &BlockCache) {
        let header = {
            let mut state = self.state.lock();
            assert!(!state.committing, "end_op: committing");
            state.outstanding -= 1;
            if state.outstanding > 0 {
                return;
            }
            state.committing = true;
            state.header
        };

        self.commit(cache, &header);

        let mut state = self.state.lock();
        state.header.n = 0;
        state.committing = false;
    }

    /// 记录一次块修改，代替直接写回。
    /// 缓冲区被钉住直到提交完成；同一事务内对同一块的多次修改只记一次。
    pub fn write(&self, buf: &BufGuard<'_>) {
        let mut state = self.state.lock();
        let n = state.header.n as usize;
        assert!(
            n < LOGSIZE && n + 1 < self.size as usize,
            "log_write: too big a transaction"
        );
        assert!(state.outstanding > 0, "log_write: outside of transaction");

        if state.header.blocks().contains(&buf.block_id()) {
            return;
        }
        state.header.blocks[n] = buf.block_id();
        state.header.n += 1;
        buf.pin();
    }
}

impl Journal {
    fn recover(&self, cache: &BlockCache) {
        let header = cache.read(self.dev, self.start).map(0, |header: &LogHeader| *header);
        assert!(header.n as usize <= LOGSIZE, "recover: corrupt log header");
        if header.n > 0 {
            log::debug!("log: recovering {} blocks on dev {}", header.n, self.dev);
        }
        self.install(cache, &header, true);
        self.write_head(cache, &LogHeader::EMPTY);
    }

    fn commit(&self, cache: &BlockCache, header: &LogHeader) {
        if header.n == 0 {
            return;
        }
        self.write_log(cache, header);
        // 提交点
        self.write_head(cache, header);
        self.install(cache, header, false);
        self.write_head(cache, &LogHeader::EMPTY);
        log::debug!("log: committed {} blocks on dev {}", header.n, self.dev);
    }

    /// 把缓存中修改过的块复制到日志区域
    fn write_log(&self, cache: &BlockCache, header: &LogHeader) {
        for (tail, &home) in header.blocks().iter().enumerate() {
            let mut to = cache.read(self.dev, self.start + tail as u32 + 1);
            let from = cache.read(self.dev, home);
            to.data_mut().copy_from_slice(from.data());
            to.writeback();
        }
    }

    /// 把日志区域中的块安装到原位置
    fn install(&self, cache: &BlockCache, header: &LogHeader, recovering: bool) {
        for (tail, &home) in header.blocks().iter().enumerate() {
            let from = cache.read(self.dev, self.start + tail as u32 + 1);
            let mut to = cache.read(self.dev, home);
            to.data_mut().copy_from_slice(from.data());
            to.writeback();
            if !recovering {
                to.unpin();
            }
        }
    }

    fn write_head(&self, cache: &BlockCache, header: &LogHeader) {
        let mut buf = cache.read(self.dev, self.start);
        buf.map_mut(0, |on_disk: &mut LogHeader| *on_disk = *header);
        buf.writeback();
    }
}

/// 一次文件系统操作，析构时结束操作
#[must_use = "dropping the guard ends the operation immediately"]
pub struct Op<'a> {
    journal: &'a Journal,
    cache: &'a BlockCache,
}

impl<'a> Op<'a> {
    pub(crate) fn begin(journal: &'a Journal, cache: &'a BlockCache) -> Self {
        journal.begin();
        Self { journal, cache }
    }
}

impl Drop for Op<'_> {
    fn drop(&mut self) {
        self.journal.end(self.cache);
    }
}
