//! Assembler Adapters - 文档装配适配器

mod file_assembler;

pub use file_assembler::{FileAssembler, FileAssemblerConfig};
