use std::fmt;

use voxbridge_session::{Participant, PlaybackState, SubscriptionState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallSessionState {
    #[default]
    Idle,
    Joining,
    Joined,
    Failed,
    Left,
}

impl CallSessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSessionState::Idle => "idle",
            CallSessionState::Joining => "joining",
            CallSessionState::Joined => "joined",
            CallSessionState::Failed => "failed",
            CallSessionState::Left => "left",
        }
    }
}

impl fmt::Display for CallSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the controller remembers about one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub id: String,
    pub display_name: String,
    pub is_local: bool,
    pub microphone_subscription: SubscriptionState,
    pub microphone_playback: PlaybackState,
}

impl ParticipantRecord {
    /// Microphone subscribed and playable.
    pub fn is_audible(&self) -> bool {
        self.microphone_subscription == SubscriptionState::Subscribed
            && self.microphone_playback == PlaybackState::Playable
    }
}

impl From<&Participant> for ParticipantRecord {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.clone(),
            display_name: participant.user_name().to_string(),
            is_local: participant.is_local(),
            microphone_subscription: participant.microphone_subscription(),
            microphone_playback: participant.microphone_playback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audible_requires_subscribed_and_playable() {
        let participant = Participant::new("p1", "Vapi Speaker")
            .with_microphone(SubscriptionState::Subscribed, PlaybackState::Loading);
        let mut record = ParticipantRecord::from(&participant);
        assert_eq!(record.display_name, "Vapi Speaker");
        assert!(!record.is_audible());
        record.microphone_playback = PlaybackState::Playable;
        assert!(record.is_audible());
        record.microphone_subscription = SubscriptionState::Staged;
        assert!(!record.is_audible());
    }

    #[test]
    fn state_names() {
        assert_eq!(CallSessionState::default(), CallSessionState::Idle);
        assert_eq!(CallSessionState::Joined.to_string(), "joined");
    }
}
