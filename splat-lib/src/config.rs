/// Camera forward-axis agreement below which a sort is skipped.
pub const DEFAULT_COHERENCE_THRESHOLD: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortConfig {
    /// Upper bound on the number of splats sorted and emitted. A cap carried
    /// by an individual view request takes precedence.
    pub max_splats: Option<usize>,
    /// A sort is skipped when `|dot(forward, last_forward) - 1|` falls below
    /// this value and the splat data is unchanged. Both forward axes (matrix
    /// elements 2, 6, 10) are normalized first, so the value compares
    /// directions only. Zero disables the skip.
    pub coherence_threshold: f32,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            max_splats: None,
            coherence_threshold: DEFAULT_COHERENCE_THRESHOLD,
        }
    }
}

impl SortConfig {
    pub fn with_max_splats(mut self, max_splats: usize) -> Self {
        self.max_splats = Some(max_splats);
        self
    }

    pub fn with_coherence_threshold(mut self, threshold: f32) -> Self {
        self.coherence_threshold = threshold;
        self
    }
}
