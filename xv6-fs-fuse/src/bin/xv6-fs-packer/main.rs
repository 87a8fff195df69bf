mod cli;

use std::io::{self, Write};

use clap::Parser;
use cli::{Cli, Command};
use xv6_fs::FormatOptions;

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            out,
            size,
            inodes,
        } => {
            println!("source={source:?}\nout={out:?}");
            let fs = xv6_fs_fuse::create_image(&out, FormatOptions { size, inodes })?;
            let packed = xv6_fs_fuse::pack_dir(&fs, &source, "/")?;
            log::info!("{packed} files, {} blocks free", fs.free_blocks());
        }
        Command::Ls { image, path } => {
            let fs = xv6_fs_fuse::open_image(&image)?;
            for (entry, stat) in xv6_fs_fuse::list_dir(&fs, &path)? {
                println!(
                    "{:<14} {:?} {:>4} {:>3} {:>8}",
                    entry.name, stat.ty, stat.inode, stat.links, stat.size
                );
            }
        }
        Command::Cat { image, path } => {
            let fs = xv6_fs_fuse::open_image(&image)?;
            let data = xv6_fs_fuse::read_file(&fs, &path)?;
            io::stdout().write_all(&data)?;
        }
    }

    Ok(())
}
