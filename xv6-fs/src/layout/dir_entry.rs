use core::{ptr, slice};

/// 目录项名字的最大长度，恰好占满时没有结尾的 \0
pub const DIRSIZ: usize = 14;

/// 目录项，索引节点号为 0 表示空闲
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct DirEntry {
    inum: u16,
    name: [u8; DIRSIZ],
}

impl DirEntry {
    /// 目录项大小恒为16字节
    pub const SIZE: usize = 16;

    /// 超长的名字会被截断
    #[inline]
    pub fn new(name: &[u8], inum: u16) -> Self {
        let len = name.len().min(DIRSIZ);
        let mut buf = [0; DIRSIZ];
        buf[..len].copy_from_slice(&name[..len]);

        Self { inum, name: buf }
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    #[inline]
    pub fn inode_number(&self) -> u32 {
        self.inum as u32
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.inum == 0
    }

    /// 只比较前 [`DIRSIZ`] 个字节
    pub fn matches(&self, name: &[u8]) -> bool {
        let name = &name[..name.len().min(DIRSIZ)];
        let name = name.split(|&c| c == 0).next().unwrap_or_default();
        self.name() == name
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
