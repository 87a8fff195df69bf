use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build an image from a host directory
    Pack {
        /// Host directory copied into the image root
        #[arg(long, short)]
        source: PathBuf,

        /// Output image
        #[arg(long, short)]
        out: PathBuf,

        /// Total number of blocks
        #[arg(long, default_value_t = xv6_fs::config::FSSIZE)]
        size: u32,

        /// Number of on-disk inodes
        #[arg(long, default_value_t = xv6_fs::config::NINODES)]
        inodes: u32,
    },

    /// List a directory inside an image
    Ls {
        image: PathBuf,

        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file inside an image
    Cat { image: PathBuf, path: String },
}
