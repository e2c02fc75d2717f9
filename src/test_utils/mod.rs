//! the test_utils folder here will share utils or test components between
//! unit tests
mod common;
mod host;

pub use common::*;
pub use host::*;
