pub mod align;
pub mod assemble;
pub mod context;
pub mod denoise;
pub mod recover;
pub mod recursion;
pub mod worker;
