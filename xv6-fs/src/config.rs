//! 文件系统的编译期参数

/// 单个文件系统操作最多写入的块数
pub const MAXOPBLOCKS: usize = 10;
/// 日志区域可容纳的块数
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;
/// 块缓存中缓冲区的个数
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// 块缓存的分片数
pub const NBUCKET: usize = 13;
/// 内存索引节点表的容量
pub const NINODE: usize = 50;
/// 路径的最大长度，也是符号链接记录的长度
pub const MAXPATH: usize = 128;
/// 解析符号链接时最多跳转的次数
pub const MAX_SYMLINK_HOPS: usize = 10;

/// 根文件系统所在的设备号
pub const ROOTDEV: u32 = 1;
/// 根目录的索引节点号
pub const ROOTINO: u32 = 1;

/// 格式化时默认的总块数
pub const FSSIZE: u32 = 2000;
/// 格式化时默认的索引节点数
pub const NINODES: u32 = 200;
