use super::RecipientId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use strum::{Display, EnumString};

/// Event discriminator carried in the first topic level below a camera's
/// `#` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum CameraEvent {
    /// Snapshot image, sent to standing subscribers.
    #[strum(serialize = "photo")]
    Photo,
    /// Motion-triggered clip, sent to standing subscribers.
    #[strum(serialize = "videom")]
    MotionVideo,
    /// Regular clip, sent only to one-time subscribers.
    #[strum(serialize = "video")]
    Video,
}

/// What a sensor update produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A binary or numeric sensor crossed its threshold outside the trigger gap.
    Triggered,
    /// Free text from a notify sensor.
    Text(String),
    /// Camera snapshot. `offer_next_video` lists recipients who should get
    /// a one-tap button for the next clip.
    Photo {
        data: Arc<[u8]>,
        offer_next_video: Vec<RecipientId>,
    },
    /// Camera clip.
    Video { data: Arc<[u8]>, motion: bool },
}

/// A notification decision produced by [`super::Sensor::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub sensor: String,
    pub kind: EventKind,
    pub recipients: Vec<RecipientId>,
    pub at: DateTime<Utc>,
}
