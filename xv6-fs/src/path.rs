//! # 路径解析层
//!
//! 逐个元素地解析路径：锁住当前目录，查找下一个元素，
//! 解锁并释放当前目录后再前进，任何时刻最多持有一个目录的锁。

use vfs::Error;

use crate::FileSystem;
use crate::inode::InodeRef;
use crate::layout::DIRSIZ;

/// 取出路径的下一个元素，返回（元素，剩余路径），剩余路径没有前导的 `/`。
/// 元素超过 [`DIRSIZ`] 时截断；路径中没有元素时返回空。
///
/// - `"a/bb/c"` → `("a", "bb/c")`
/// - `"///a//bb"` → `("a", "bb")`
/// - `"a"` → `("a", "")`
/// - `""`、`"///"` → 空
pub(crate) fn skip_elem(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&c| c != b'/')?;
    let path = &path[start..];

    let len = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
    let (name, rest) = path.split_at(len);
    let rest = rest
        .iter()
        .position(|&c| c != b'/')
        .map_or(&[][..], |start| &rest[start..]);

    Some((&name[..name.len().min(DIRSIZ)], rest))
}

impl FileSystem {
    /// 解析路径，返回其索引节点的引用（未加锁）。
    /// 绝对路径从根目录开始，相对路径从 `cwd` 开始，`cwd` 为空时视同根目录。
    /// 不跟随符号链接。
    pub fn resolve<'fs>(
        &'fs self,
        path: &str,
        cwd: Option<&InodeRef<'fs>>,
    ) -> vfs::Result<InodeRef<'fs>> {
        self.walk(path, cwd, false).map(|(inode, _)| inode)
    }

    /// 解析路径的父目录，返回其引用（未加锁）与最后一个元素
    pub fn resolve_parent<'fs, 'p>(
        &'fs self,
        path: &'p str,
        cwd: Option<&InodeRef<'fs>>,
    ) -> vfs::Result<(InodeRef<'fs>, &'p [u8])> {
        self.walk(path, cwd, true)
    }

    fn walk<'fs, 'p>(
        &'fs self,
        path: &'p str,
        cwd: Option<&InodeRef<'fs>>,
        parent: bool,
    ) -> vfs::Result<(InodeRef<'fs>, &'p [u8])> {
        let mut inode = match cwd {
            Some(cwd) if !path.starts_with('/') => cwd.clone(),
            _ => self.root(),
        };

        let mut rest = path.as_bytes();
        while let Some((name, next)) = skip_elem(rest) {
            let mut dir = inode.lock();
            if !dir.is_dir() {
                return Err(Error::NotADirectory);
            }
            if parent && next.is_empty() {
                // 提前一层停下
                return Ok((dir.unlock(), name));
            }

            log::trace!(
                "namei: looking up {:?} in inode {}",
                core::str::from_utf8(name).unwrap_or("?"),
                dir.inum()
            );
            let Some((child, _)) = dir.lookup(name) else {
                return Err(Error::NotFound);
            };
            drop(dir);

            inode = child;
            rest = next;
        }

        if parent {
            return Err(Error::NotFound);
        }
        Ok((inode, &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::skip_elem;

    #[test]
    fn elements() {
        assert_eq!(skip_elem(b"a/bb/c"), Some((&b"a"[..], &b"bb/c"[..])));
        assert_eq!(skip_elem(b"///a//bb"), Some((&b"a"[..], &b"bb"[..])));
        assert_eq!(skip_elem(b"a"), Some((&b"a"[..], &b""[..])));
        assert_eq!(skip_elem(b"a/"), Some((&b"a"[..], &b""[..])));
        assert_eq!(skip_elem(b""), None);
        assert_eq!(skip_elem(b"////"), None);
    }

    #[test]
    fn long_element_is_truncated() {
        let (name, rest) = skip_elem(b"/0123456789abcdefgh/x").unwrap();
        assert_eq!(name, b"0123456789abcd");
        assert_eq!(rest, b"x");
    }
}
