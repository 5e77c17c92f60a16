#![allow(dead_code)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod map;
pub mod red_black_tree;
pub mod set;

pub use map::TreeMap;
pub use red_black_tree::{Compare, KeySelect, NaturalOrder, RedBlackTree};
pub use set::TreeSet;
