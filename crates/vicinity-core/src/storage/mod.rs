//! Persistent storage: the memory-mapped vector list.

mod defrag;
mod entry;
mod list;

pub use list::{VectorList, VectorListIter, DEFAULT_CAPACITY};
