use thiserror::Error;

/// Errors raised while clustering one channel.
///
/// The invariant variants are fatal for the channel run: they signal a
/// broken internal assumption, not a data condition. Undersized branches,
/// edge-skipped spikes and peak-channel mismatches are handled locally and
/// never surface here.
#[derive(Debug, Error)]
pub enum SortError {
    /// The merge threshold search exceeded its iteration bound; component
    /// count is assumed monotone in the threshold and this means it was not.
    #[error("stability threshold search exceeded {0} bisection iterations")]
    ThresholdSearchDiverged(usize),

    /// A probe boundary produced a component count the search ruled out.
    #[error(
        "expected {expected} connected components at threshold {threshold}, found {found}"
    )]
    ComponentCountMismatch {
        expected: usize,
        found: usize,
        threshold: f32,
    },

    /// The mixture solver could not produce a usable fit.
    #[error("degenerate mixture fit: {0}")]
    DegenerateFit(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive: {0}")]
    Archive(#[from] serde_json::Error),
}
