//! Launch description parsing, include scanning, and substitution

mod includes;
mod launch_file;
mod substitution;

pub use includes::*;
pub use launch_file::*;
pub use substitution::*;
