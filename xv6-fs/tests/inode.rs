mod common;

use xv6_fs::config::{ROOTDEV, ROOTINO};
use xv6_fs::{FileSystem, InodeKind};

#[test]
fn root_after_format() {
    let (_disk, fs) = common::format(500, 32);

    let root = fs.root().lock();
    assert_eq!(root.inum(), ROOTINO);
    assert!(root.is_dir());
    assert_eq!(root.nlink, 1);
    assert_eq!(root.size, 32);

    let stat = root.stat();
    assert_eq!(stat.inode, ROOTINO);
    assert_eq!(stat.ty, vfs::DirEntryType::Directory);
    drop(root);

    assert_eq!(fs.live_inodes(), 0);
}

#[test]
fn dup_shares_one_entry() {
    let (_disk, fs) = common::format(500, 32);

    let a = fs.inode(ROOTDEV, ROOTINO);
    let b = fs.inode(ROOTDEV, ROOTINO);
    let c = b.clone();
    assert_eq!(fs.inode_ref_count(ROOTDEV, ROOTINO), 3);
    assert_eq!(fs.live_inodes(), 1);

    drop(a);
    drop(c);
    assert_eq!(fs.inode_ref_count(ROOTDEV, ROOTINO), 1);

    // 加锁与解锁不改变引用计数
    let guard = b.lock();
    assert_eq!(fs.inode_ref_count(ROOTDEV, ROOTINO), 1);
    let b = guard.unlock();
    assert_eq!(fs.inode_ref_count(ROOTDEV, ROOTINO), 1);

    drop(b);
    assert_eq!(fs.live_inodes(), 0);
}

#[test]
fn allocation_picks_lowest_free_inode() {
    let (_disk, fs) = common::format(500, 32);

    let _op = fs.begin_op();
    let first = fs.alloc_inode(ROOTDEV, InodeKind::File).unwrap();
    let second = fs.alloc_inode(ROOTDEV, InodeKind::Directory).unwrap();
    assert_eq!(first.inum(), 2);
    assert_eq!(second.inum(), 3);

    let first = first.lock();
    assert_eq!(first.kind(), Some(InodeKind::File));
    assert_eq!(first.size, 0);
    assert_eq!(first.nlink, 0);
}

#[test]
fn inode_region_exhaustion() {
    let (_disk, fs) = common::format(500, 8);

    let _op = fs.begin_op();
    // 0 号不使用，1 号是根目录
    let inodes: Vec<_> = (2..8)
        .map(|_| {
            let inode = fs.alloc_inode(ROOTDEV, InodeKind::File).unwrap();
            let mut guard = inode.lock();
            guard.nlink = 1;
            guard.update();
            guard.unlock()
        })
        .collect();
    assert_eq!(inodes.len(), 6);
    assert!(fs.alloc_inode(ROOTDEV, InodeKind::File).is_none());
}

#[test]
fn unlinked_file_survives_until_last_reference() {
    let (_disk, fs) = common::format(500, 32);
    let free = fs.free_blocks();

    let inode = fs.create("/victim", InodeKind::File, 0, 0, None).unwrap().unlock();
    let inum = inode.inum();
    assert_eq!(fs.write_file(&inode, 0, &common::pattern(5000)), Ok(5000));
    let used = free - fs.free_blocks();
    assert_eq!(used, 5);

    fs.unlink("/victim", None).unwrap();
    assert_eq!(fs.resolve("/victim", None).err(), Some(vfs::Error::NotFound));

    // 仍然可读，块也没有被回收
    let mut buf = vec![0; 5000];
    assert_eq!(fs.read_file(&inode, 0, &mut buf), 5000);
    assert_eq!(buf, common::pattern(5000));
    assert_eq!(fs.free_blocks(), free - used);
    assert_eq!(fs.inode_ref_count(ROOTDEV, inum), 1);

    {
        let _op = fs.begin_op();
        drop(inode);
    }
    assert_eq!(fs.free_blocks(), free);
    assert_eq!(fs.live_inodes(), 0);

    // 索引节点可以重新分配
    let _op = fs.begin_op();
    assert_eq!(fs.alloc_inode(ROOTDEV, InodeKind::File).unwrap().inum(), inum);
}

#[test]
fn guard_mutations_persist_after_remount() {
    let (disk, fs) = common::format(500, 32);

    {
        let _op = fs.begin_op();
        let mut root = fs.root().lock();
        root.major = 7;
        root.update();
    }
    drop(fs);

    let fs = common::remount(&disk);
    assert_eq!(fs.root().lock().major, 7);
}

#[test]
#[should_panic(expected = "iget: no inodes")]
fn table_exhaustion_is_fatal() {
    let (disk, fs) = common::format(500, 32);
    drop(fs);

    let fs = FileSystem::mount_with(common::cache(&disk), ROOTDEV, 2);
    let _a = fs.inode(ROOTDEV, 1);
    let _b = fs.inode(ROOTDEV, 2);
    let _c = fs.inode(ROOTDEV, 3);
}

#[test]
#[should_panic(expected = "ilock: inode 5 has no type")]
fn locking_free_inode_is_fatal() {
    let (_disk, fs) = common::format(500, 32);
    let _ = fs.inode(ROOTDEV, 5).lock();
}
