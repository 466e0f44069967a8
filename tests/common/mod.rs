#![allow(dead_code)]

pub mod concurrent;
pub mod data;

pub use concurrent::run_scoped_with_barrier;
pub use data::{int_table, random_table, sorted};
