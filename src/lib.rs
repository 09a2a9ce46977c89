#![cfg_attr(feature = "clippy", feature(plugin))]
#![cfg_attr(feature = "clippy", plugin(clippy))]

extern crate serde;
#[macro_use]
extern crate serde_derive;

mod entry;
pub mod arena;
pub mod red_black_tree;
