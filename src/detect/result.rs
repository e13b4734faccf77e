use crate::BoundingBox;

/// One raw detection as produced by a backend, before confidence filtering
/// and id assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub class_id: u32,
    pub bbox: BoundingBox,
    /// Confidence in (0, 1].
    pub confidence: f32,
}
