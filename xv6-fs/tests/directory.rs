mod common;

use enumflags2::BitFlags;
use vfs::{DirEntryType, Error};
use xv6_fs::config::{MAX_SYMLINK_HOPS, MAXPATH, ROOTINO};
use xv6_fs::{FileSystem, InodeKind, OpenFlag};

fn mkdir(fs: &FileSystem, path: &str) -> u32 {
    fs.create(path, InodeKind::Directory, 0, 0, None).unwrap().inum()
}

fn touch(fs: &FileSystem, path: &str) -> u32 {
    fs.create(path, InodeKind::File, 0, 0, None).unwrap().inum()
}

fn nlink(fs: &FileSystem, path: &str) -> u16 {
    fs.resolve(path, None).unwrap().lock().nlink
}

#[test]
fn lookup_and_duplicate_names() {
    let (_disk, fs) = common::format(500, 32);
    let inum = mkdir(&fs, "/d");

    let mut root = fs.root().lock();
    let (child, offset) = root.lookup(b"d").unwrap();
    assert_eq!(child.inum(), inum);
    // `.`、`..` 之后的第一项
    assert_eq!(offset, 32);
    assert!(root.lookup(b"missing").is_none());
    assert_eq!(root.link(b"d", 9), Err(Error::AlreadyExists));
    drop(child);

    let (dot, _) = root.lookup(b".").unwrap();
    assert_eq!(dot.inum(), ROOTINO);
    drop(dot);
    drop(root);

    let mut dir = fs.resolve("/d", None).unwrap().lock();
    let (parent, _) = dir.lookup(b"..").unwrap();
    assert_eq!(parent.inum(), ROOTINO);
    let (me, _) = dir.lookup(b".").unwrap();
    assert_eq!(me.inum(), inum);
}

#[test]
fn freed_entries_are_reused() {
    let (_disk, fs) = common::format(500, 32);
    touch(&fs, "/a");
    touch(&fs, "/b");
    let size = fs.root().lock().size;

    fs.unlink("/a", None).unwrap();
    touch(&fs, "/c");
    let mut root = fs.root().lock();
    assert_eq!(root.size, size);
    assert_eq!(root.lookup(b"c").unwrap().1, 32);
}

#[test]
fn multi_component_resolution() {
    let (_disk, fs) = common::format(500, 32);
    mkdir(&fs, "/a");
    let b = mkdir(&fs, "/a/b");
    let c = touch(&fs, "/a/b/c");

    let inode = fs.resolve("/a/b/c", None).unwrap();
    assert_eq!(inode.inum(), c);
    // 中间目录的引用都已释放
    assert_eq!(fs.live_inodes(), 1);
    drop(inode);

    assert_eq!(fs.resolve("//a///b/c", None).unwrap().inum(), c);
    assert_eq!(fs.resolve("/a/b/..", None).unwrap().inum(), fs.resolve("/a", None).unwrap().inum());
    assert_eq!(fs.resolve("/", None).unwrap().inum(), ROOTINO);

    let (parent, name) = fs.resolve_parent("/a/b/c", None).unwrap();
    assert_eq!(parent.inum(), b);
    assert_eq!(name, b"c");
    drop(parent);

    // 相对路径
    let cwd = fs.resolve("/a", None).unwrap();
    assert_eq!(fs.resolve("b/c", Some(&cwd)).unwrap().inum(), c);
    assert_eq!(fs.resolve("/a/b", Some(&cwd)).unwrap().inum(), b);
    assert_eq!(fs.live_inodes(), 1);
    drop(cwd);

    assert_eq!(fs.live_inodes(), 0);
}

#[test]
fn resolution_errors() {
    let (_disk, fs) = common::format(500, 32);
    mkdir(&fs, "/a");
    touch(&fs, "/a/file");

    assert_eq!(fs.resolve("/a/missing", None).err(), Some(Error::NotFound));
    assert_eq!(fs.resolve("/missing/x", None).err(), Some(Error::NotFound));
    assert_eq!(fs.resolve("/a/file/x", None).err(), Some(Error::NotADirectory));
    assert_eq!(fs.resolve_parent("/", None).err(), Some(Error::NotFound));
    assert_eq!(fs.resolve_parent("", None).err(), Some(Error::NotFound));
    assert_eq!(fs.live_inodes(), 0);
}

#[test]
fn long_names_are_truncated() {
    let (_disk, fs) = common::format(500, 32);
    let inum = touch(&fs, "/abcdefghijklmnopqrstuvwxyz");

    assert_eq!(fs.resolve("/abcdefghijklmn", None).unwrap().inum(), inum);
    assert_eq!(fs.resolve("/abcdefghijklmnXYZ", None).unwrap().inum(), inum);
}

#[test]
fn create_existing() {
    let (_disk, fs) = common::format(500, 32);
    let file = touch(&fs, "/f");
    mkdir(&fs, "/d");

    // 普通文件直接返回已有的
    assert_eq!(touch(&fs, "/f"), file);
    assert!(matches!(
        fs.create("/f", InodeKind::Directory, 0, 0, None),
        Err(Error::AlreadyExists)
    ));
    assert!(matches!(
        fs.create("/d", InodeKind::File, 0, 0, None),
        Err(Error::AlreadyExists)
    ));
    assert!(matches!(
        fs.create("/nope/f", InodeKind::File, 0, 0, None),
        Err(Error::NotFound)
    ));
}

#[test]
fn directories_count_parent_links() {
    let (_disk, fs) = common::format(500, 32);
    assert_eq!(nlink(&fs, "/"), 1);

    mkdir(&fs, "/a");
    mkdir(&fs, "/b");
    assert_eq!(nlink(&fs, "/"), 3);
    assert_eq!(nlink(&fs, "/a"), 1);

    fs.unlink("/b", None).unwrap();
    assert_eq!(nlink(&fs, "/"), 2);
}

#[test]
fn unlink_rules() {
    let (_disk, fs) = common::format(500, 32);
    let free = fs.free_blocks();
    mkdir(&fs, "/a");
    let c = touch(&fs, "/a/c");

    assert_eq!(fs.unlink("/a", None), Err(Error::DirectoryNotEmpty));
    assert_eq!(fs.unlink("/a/.", None), Err(Error::InvalidArgument));
    assert_eq!(fs.unlink("/a/..", None), Err(Error::InvalidArgument));
    assert_eq!(fs.unlink("/a/missing", None), Err(Error::NotFound));

    let file = fs.resolve("/a/c", None).unwrap();
    fs.write_file(&file, 0, b"data").unwrap();
    drop(file);

    fs.unlink("/a/c", None).unwrap();
    assert_eq!(fs.resolve("/a/c", None).err(), Some(Error::NotFound));
    fs.unlink("/a", None).unwrap();
    assert_eq!(fs.live_inodes(), 0);
    assert_eq!(fs.free_blocks(), free);

    // 回收的索引节点被重新使用
    assert_eq!(touch(&fs, "/again"), c - 1);
}

#[test]
fn hard_links() {
    let (_disk, fs) = common::format(500, 32);
    let inum = touch(&fs, "/target");
    mkdir(&fs, "/dir");

    fs.link("/target", "/dir/alias", None).unwrap();
    assert_eq!(fs.resolve("/dir/alias", None).unwrap().inum(), inum);
    assert_eq!(nlink(&fs, "/target"), 2);

    assert_eq!(fs.link("/dir", "/dir2", None), Err(Error::IsADirectory));
    assert_eq!(fs.link("/target", "/dir/alias", None), Err(Error::AlreadyExists));
    assert_eq!(fs.link("/target", "/nope/x", None), Err(Error::NotFound));
    assert_eq!(fs.link("/missing", "/x", None), Err(Error::NotFound));
    // 失败的链接不改变链接数
    assert_eq!(nlink(&fs, "/target"), 2);

    let file = fs.open("/target", BitFlags::empty(), None).unwrap();
    fs.write_file(&file, 0, b"shared").unwrap();
    drop(file);
    fs.unlink("/target", None).unwrap();

    let alias = fs.open("/dir/alias", BitFlags::empty(), None).unwrap();
    let mut buf = [0; 6];
    assert_eq!(fs.read_file(&alias, 0, &mut buf), 6);
    assert_eq!(&buf, b"shared");
    assert_eq!(alias.clone().lock().nlink, 1);
}

#[test]
fn symlinks_are_followed() {
    let (_disk, fs) = common::format(500, 32);
    let target = touch(&fs, "/target");
    mkdir(&fs, "/d");

    fs.symlink("/target", "/ln", None).unwrap();
    fs.symlink("../ln", "/d/rel", None).unwrap();

    assert_eq!(fs.open("/ln", BitFlags::empty(), None).unwrap().inum(), target);
    // 相对目标从 `cwd` 开始解析
    let cwd = fs.resolve("/d", None).unwrap();
    assert_eq!(fs.open("rel", BitFlags::empty(), Some(&cwd)).unwrap().inum(), target);
    drop(cwd);

    let link = fs.open("/ln", OpenFlag::NOFOLLOW.into(), None).unwrap();
    let mut link = link.lock();
    assert_eq!(link.kind(), Some(InodeKind::Symlink));
    assert_eq!(link.size as usize, MAXPATH);
    assert_eq!(link.read_link().as_deref(), Ok("/target"));
    assert_eq!(link.stat().ty, DirEntryType::SymLink);
    drop(link);

    // 路径中间的符号链接不被跟随
    assert_eq!(fs.resolve("/ln", None).unwrap().lock().kind(), Some(InodeKind::Symlink));
}

#[test]
fn symlink_hops_are_bounded() {
    let (_disk, fs) = common::format(500, 64);
    let target = touch(&fs, "/target");

    fs.symlink("/target", "/l0", None).unwrap();
    for hop in 1..=MAX_SYMLINK_HOPS {
        fs.symlink(&format!("/l{}", hop - 1), &format!("/l{hop}"), None).unwrap();
    }

    let last = MAX_SYMLINK_HOPS - 1;
    assert_eq!(fs.open(&format!("/l{last}"), BitFlags::empty(), None).unwrap().inum(), target);
    assert_eq!(
        fs.open(&format!("/l{MAX_SYMLINK_HOPS}"), BitFlags::empty(), None).err(),
        Some(Error::TooManyLinks)
    );

    fs.symlink("/loop2", "/loop1", None).unwrap();
    fs.symlink("/loop1", "/loop2", None).unwrap();
    assert_eq!(fs.open("/loop1", BitFlags::empty(), None).err(), Some(Error::TooManyLinks));

    fs.symlink("/nothing", "/dangling", None).unwrap();
    assert_eq!(fs.open("/dangling", BitFlags::empty(), None).err(), Some(Error::NotFound));
    assert_eq!(fs.live_inodes(), 0);
}

#[test]
fn symlink_arguments() {
    let (_disk, fs) = common::format(500, 32);
    touch(&fs, "/exists");

    assert_eq!(fs.symlink("", "/a", None), Err(Error::InvalidArgument));
    let long = "x".repeat(MAXPATH + 1);
    assert_eq!(fs.symlink(&long, "/a", None), Err(Error::InvalidArgument));
    assert_eq!(fs.symlink("/x", "/exists", None), Err(Error::AlreadyExists));
}

#[test]
fn open_flags() {
    let (_disk, fs) = common::format(500, 32);
    mkdir(&fs, "/d");

    assert_eq!(fs.open("/new", BitFlags::empty(), None).err(), Some(Error::NotFound));
    let created = fs.open("/new", OpenFlag::CREATE.into(), None).unwrap();
    assert_eq!(created.clone().lock().kind(), Some(InodeKind::File));
    fs.write_file(&created, 0, b"abc").unwrap();

    // 已存在时 CREATE 打开同一个文件
    let again = fs.open("/new", OpenFlag::CREATE | OpenFlag::TRUNC, None).unwrap();
    assert_eq!(again.inum(), created.inum());
    assert_eq!(again.clone().lock().size, 0);

    assert_eq!(
        fs.open("/new", OpenFlag::DIRECTORY.into(), None).err(),
        Some(Error::NotADirectory)
    );
    assert!(fs.open("/d", OpenFlag::DIRECTORY.into(), None).is_ok());
    assert!(fs.open("/d", OpenFlag::CREATE.into(), None).is_err());
}

#[test]
fn read_dir_lists_live_entries() {
    let (_disk, fs) = common::format(500, 32);
    let a = mkdir(&fs, "/a");
    let f = touch(&fs, "/f");
    touch(&fs, "/gone");
    fs.unlink("/gone", None).unwrap();
    fs.symlink("/f", "/s", None).unwrap();

    let entries = fs.root().lock().read_dir();
    let listed: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.inode, e.ty)).collect();
    assert_eq!(
        listed,
        [
            (".", ROOTINO, DirEntryType::Directory),
            ("..", ROOTINO, DirEntryType::Directory),
            ("a", a, DirEntryType::Directory),
            ("f", f, DirEntryType::Regular),
            ("s", f + 1, DirEntryType::SymLink),
        ]
    );
}
