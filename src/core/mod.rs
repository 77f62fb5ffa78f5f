pub mod coreset;
pub mod mixture;
pub mod pca;
pub mod stability;
pub mod triage;
