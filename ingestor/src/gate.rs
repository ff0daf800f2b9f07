use crate::model::LocationSample;

pub const ALERT_TITLE: &str = "Movement alert";
pub const ALERT_BODY: &str = "Movement was detected on your vehicle, please check it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Transition into motion
    Fire,
    /// The device already reported motion before this window
    Suppress,
}

/// Decide whether a fresh `Moving` classification is a new episode.
///
/// `preceding` is the sample just before the evaluated window (the fourth
/// most recent). No preceding sample means the history starts with motion,
/// which counts as a transition.
pub fn evaluate(preceding: Option<&LocationSample>) -> GateDecision {
    match preceding {
        Some(sample) if sample.moving => GateDecision::Suppress,
        _ => GateDecision::Fire,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub token: String,
    pub title: String,
    pub body: String,
}

impl PushNotification {
    pub fn movement_alert(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            title: ALERT_TITLE.to_string(),
            body: ALERT_BODY.to_string(),
        }
    }
}
