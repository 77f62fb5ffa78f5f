pub mod archive;
pub mod probe;
pub mod reader;
pub mod template_space;
