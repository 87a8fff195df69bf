//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 读写都是同步的：调用返回时传输已经完成，
//! 设备中断与完成通知由驱动自己处理。
#![no_std]

use core::any::Any;

/// 块设备驱动特质
///
/// `buf` 的长度即块大小，由上层文件系统决定。
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
