//! 与具体文件系统无关的公共类型，供系统调用层和宿主工具使用。
#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    error::{Error, Result},
    stat::Stat,
};
