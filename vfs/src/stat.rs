use crate::DirEntryType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// 所在设备号
    pub dev: u32,
    /// Inode number
    pub inode: u32,
    pub ty: DirEntryType,
    /// 硬链接个数
    pub links: u16,
    /// File size
    pub size: u64,
}
