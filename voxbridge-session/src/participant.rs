use serde::{Deserialize, Serialize};

/// Subscription state of a remote media track, as reported by the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Subscribed,
    Staged,
    #[default]
    Unsubscribed,
}

/// Playback state of a remote media track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playable,
    Loading,
    Interrupted,
    Blocked,
    #[default]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeftReason {
    LeftCall,
    Hidden,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantInfo {
    pub user_name: String,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackState {
    pub subscribed: SubscriptionState,
    pub state: PlaybackState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantMedia {
    pub microphone: TrackState,
}

/// A call participant as delivered in session events.
///
/// The layout follows the runtime's JSON shape
/// (`{"id", "info": {"userName", "isLocal"}, "media": {"microphone": {...}}}`)
/// so payloads coming over an FFI boundary can be deserialized directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub info: ParticipantInfo,
    #[serde(default)]
    pub media: ParticipantMedia,
}

impl Participant {
    pub fn new(id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            info: ParticipantInfo {
                user_name: user_name.into(),
                is_local: false,
            },
            media: ParticipantMedia::default(),
        }
    }

    pub fn local(mut self) -> Self {
        self.info.is_local = true;
        self
    }

    pub fn with_microphone(mut self, subscribed: SubscriptionState, state: PlaybackState) -> Self {
        self.media.microphone = TrackState { subscribed, state };
        self
    }

    pub fn user_name(&self) -> &str {
        &self.info.user_name
    }

    pub fn is_local(&self) -> bool {
        self.info.is_local
    }

    pub fn microphone_subscription(&self) -> SubscriptionState {
        self.media.microphone.subscribed
    }

    pub fn microphone_playback(&self) -> PlaybackState {
        self.media.microphone.state
    }
}
