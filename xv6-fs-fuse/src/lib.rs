
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use xv6_fs::config::ROOTDEV;
use xv6_fs::{BLOCK_SIZE, BlockCache, FileSystem, FormatOptions, InodeKind, InodeRef, OpenFlag};

/// 以宿主文件充当块设备的磁盘镜像
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }
}

/// 按 `options` 新建镜像并格式化
pub fn create_image(path: &Path, options: FormatOptions) -> io::Result<FileSystem> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    fd.set_len(options.size as u64 * BLOCK_SIZE as u64)?;

    let cache = BlockCache::default().with_device(ROOTDEV, Arc::new(BlockFile(Mutex::new(fd))));
    Ok(FileSystem::format(cache, ROOTDEV, options))
}

/// 挂载已有的镜像
pub fn open_image(path: &Path) -> io::Result<FileSystem> {
    let fd = OpenOptions::new().read(true).write(true).open(path)?;
    let cache = BlockCache::default().with_device(ROOTDEV, Arc::new(BlockFile(Mutex::new(fd))));
    Ok(FileSystem::mount(cache, ROOTDEV))
}

/// 把宿主目录 `source` 递归复制到镜像中的目录 `dest`，返回复制的文件数
pub fn pack_dir(fs: &FileSystem, source: &Path, dest: &str) -> io::Result<usize> {
    let mut packed = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            log::warn!("skipping non UTF-8 name {:?}", entry.path());
            continue;
        };
        let path = format!("{}/{name}", dest.trim_end_matches('/'));
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            fs.create(&path, InodeKind::Directory, 0, 0, None)
                .map_err(|err| fs_error(err, &path))?;
            packed += pack_dir(fs, &entry.path(), &path)?;
        } else if file_type.is_file() {
            let mut data = Vec::new();
            File::open(entry.path())?.read_to_end(&mut data)?;
            put_file(fs, &path, &data)?;
            log::info!("packed {path}: {} bytes", data.len());
            packed += 1;
        } else {
            log::warn!("skipping {:?}", entry.path());
        }
    }
    Ok(packed)
}

/// 在镜像中创建（或覆盖）文件 `path`，写入 `data`
pub fn put_file(fs: &FileSystem, path: &str, data: &[u8]) -> io::Result<()> {
    let inode = fs
        .open(path, OpenFlag::CREATE | OpenFlag::TRUNC, None)
        .map_err(|err| fs_error(err, path))?;
    let written = fs
        .write_file(&inode, 0, data)
        .map_err(|err| fs_error(err, path))?;
    if written != data.len() {
        return Err(io::Error::new(
            ErrorKind::StorageFull,
            format!("{path}: only {written} of {} bytes written", data.len()),
        ));
    }
    Ok(())
}

/// 读出镜像中文件 `path` 的全部内容，跟随符号链接
pub fn read_file(fs: &FileSystem, path: &str) -> io::Result<Vec<u8>> {
    let inode = fs
        .open(path, BitFlags::empty(), None)
        .map_err(|err| fs_error(err, path))?;
    let size = size_of(&inode);
    let mut data = vec![0; size];
    let read = fs.read_file(&inode, 0, &mut data);
    data.truncate(read);
    Ok(data)
}

/// 列出镜像中目录 `path` 的内容
pub fn list_dir(fs: &FileSystem, path: &str) -> io::Result<Vec<(vfs::DirEntry, vfs::Stat)>> {
    let dir = fs
        .open(path, OpenFlag::DIRECTORY.into(), None)
        .map_err(|err| fs_error(err, path))?;
    let entries = dir.lock().read_dir();

    Ok(entries
        .into_iter()
        .map(|entry| {
            let stat = fs.inode(ROOTDEV, entry.inode).lock().stat();
            (entry, stat)
        })
        .collect())
}

fn size_of(inode: &InodeRef<'_>) -> usize {
    inode.clone().lock().size as usize
}

fn fs_error(err: vfs::Error, path: &str) -> io::Error {
    use vfs::Error;

    let kind = match err {
        Error::AlreadyExists => ErrorKind::AlreadyExists,
        Error::NotFound => ErrorKind::NotFound,
        Error::IsADirectory => ErrorKind::IsADirectory,
        Error::NotADirectory => ErrorKind::NotADirectory,
        Error::DirectoryNotEmpty => ErrorKind::DirectoryNotEmpty,
        Error::NoSpace => ErrorKind::StorageFull,
        Error::FileTooLarge => ErrorKind::FileTooLarge,
        Error::InvalidArgument | Error::TooManyLinks => ErrorKind::InvalidInput,
    };
    io::Error::new(kind, format!("{path}: {err:?}"))
}
