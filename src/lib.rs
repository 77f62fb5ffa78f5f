//! spiketree — recursive divisive clustering of extracellular spike
//! waveforms, one sensor channel at a time.
//!
//! The engine repeatedly splits a channel's spike set in a low-rank feature
//! space (mixture fit + soft-assignment recovery), merges over-segmented
//! components by stability, and emits terminal units whose templates peak on
//! the clustering channel's neighborhood.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod sort;
