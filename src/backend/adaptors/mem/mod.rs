pub mod mem_backend;

pub use mem_backend::*;

#[cfg(test)]
mod mem_backend_test;
