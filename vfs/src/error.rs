#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    /// 磁盘块、索引节点或目录项耗尽
    NoSpace,
    InvalidArgument,
    /// 符号链接层数超过上限
    TooManyLinks,
    FileTooLarge,
}

pub type Result<T> = core::result::Result<T, Error>;
