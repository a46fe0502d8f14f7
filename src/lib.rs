pub mod stack;
pub mod error;
pub mod dict;
pub mod vm;
pub mod outer;
pub mod prims;
pub mod io;
