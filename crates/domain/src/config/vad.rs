use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Detector confidence to enter "speech".
    #[serde(default = "d_positive_threshold")]
    pub positive_threshold: f32,
    /// Detector confidence to exit "speech".
    #[serde(default = "d_negative_threshold")]
    pub negative_threshold: f32,
    /// Consecutive speech frames required before asserting speech-start.
    #[serde(default = "d_min_speech_frames")]
    pub min_speech_frames: usize,
    /// Silence frames tolerated before asserting speech-end (~500 ms).
    #[serde(default = "d_redemption_frames")]
    pub redemption_frames: usize,
    /// Frames retained before the trigger so first syllables are not
    /// clipped (~100 ms).
    #[serde(default = "d_pre_speech_pad_frames")]
    pub pre_speech_pad_frames: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            positive_threshold: d_positive_threshold(),
            negative_threshold: d_negative_threshold(),
            min_speech_frames: d_min_speech_frames(),
            redemption_frames: d_redemption_frames(),
            pre_speech_pad_frames: d_pre_speech_pad_frames(),
        }
    }
}

fn d_positive_threshold() -> f32 {
    0.5
}

fn d_negative_threshold() -> f32 {
    0.35
}

fn d_min_speech_frames() -> usize {
    5
}

fn d_redemption_frames() -> usize {
    50
}

fn d_pre_speech_pad_frames() -> usize {
    10
}
