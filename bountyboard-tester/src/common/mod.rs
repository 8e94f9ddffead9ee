pub mod storage;
pub mod util;

pub use storage::{JsonBoardStore, MemoryBoards};
pub use util::split_csv;
