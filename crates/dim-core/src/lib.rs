//! Parcel dimensioning from a single 8-bit depth frame and a rectangular ROI.
//!
//! The stages run in order: [`roi::map_roi`], [`plane::fit_plane`], [`segment::segment`],
//! [`obb::estimate_box`], [`metrics::to_physical`]. [`pipeline::measure`] chains them.

pub mod cancel;
pub mod depth;
pub mod error;
pub mod geometry;
pub mod metrics;
pub mod obb;
pub mod pipeline;
pub mod plane;
pub mod roi;
pub mod segment;

pub use cancel::CancelToken;
pub use depth::{depth_sanity, median_depth_mm, mm_for_sample, DepthFrame, DepthSanity, DepthScale};
pub use error::{MeasureError, MeasureResult};
pub use geometry::{fov_from_known_target, Intrinsics, LensModel, Point3};
pub use metrics::{DimResult, DimensionPolicy};
pub use obb::{Orientation, OrientedBox, PoseLabel, Stance};
pub use pipeline::{measure, Calibration, Diagnostic, MeasureRequest, Measurement, PipelineConfig};
pub use plane::{FallbackReason, Plane, PlaneFit, RansacConfig};
pub use roi::{DepthRect, RegionOfInterest};
pub use segment::{mask_iou, MaskResult, SegmentConfig};
