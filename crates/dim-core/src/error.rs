use thiserror::Error;

pub type MeasureResult<T> = Result<T, MeasureError>;

/// Failures that end a measurement call.
///
/// Degraded-but-usable input (RANSAC fallback, weak height evidence, saturated depth)
/// is never reported here; see [`crate::pipeline::Diagnostic`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasureError {
    #[error("no depth grid ({width}x{height})")]
    NoDepthGrid { width: u32, height: u32 },

    #[error("ROI too small on depth grid: {span_x}x{span_y} px (min span {min_span})")]
    RoiTooSmall { span_x: u32, span_y: u32, min_span: u32 },

    #[error("not enough valid depth inside ROI: {found} < {required}")]
    InsufficientRoiSamples { found: usize, required: usize },

    #[error("plane fit unavailable: ring has {ring_points} valid points")]
    PlaneFitUnavailable { ring_points: usize },

    #[error("segmentation failed: no foreground component overlaps the ROI")]
    SegmentationFailed,

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("measurement cancelled")]
    Cancelled,
}

impl MeasureError {
    pub fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedInput(details.into())
    }

    /// True for the kinds a UI should answer with "reposition and retry" rather than a bug report.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MalformedInput(_) | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_counts() {
        let err = MeasureError::InsufficientRoiSamples { found: 12, required: 40 };
        let s = err.to_string();
        assert!(s.contains("12") && s.contains("40"));
    }

    #[test]
    fn malformed_is_not_retryable() {
        assert!(!MeasureError::malformed("len mismatch").is_retryable());
        assert!(!MeasureError::Cancelled.is_retryable());
        assert!(MeasureError::SegmentationFailed.is_retryable());
    }
}
