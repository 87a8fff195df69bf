use alloc::string::String;

/// 与具体文件系统无关的目录项，由列目录操作返回
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub inode: u32,
    pub ty: DirEntryType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    /// 设备文件
    Char,
    Directory,
    SymLink,
    #[default]
    Regular,
}
