use async_trait::async_trait;

use super::{CallSessionState, ParticipantRecord};

/// Observer of call session changes. Callbacks run on a dedicated task, in
/// the order the changes happened.
#[async_trait]
pub trait CallListener: Send + Sync {
    async fn on_state_changed(&self, state: &str);
    async fn on_participant_joined(&self, participant: ParticipantRecord);
    async fn on_participant_left(&self, participant: ParticipantRecord);
    /// The remote speaker's microphone became subscribed and playable.
    async fn on_remote_speaker_playable(&self, participant: ParticipantRecord);
    async fn on_call_ended(&self, reason: &str);
}

pub struct StubListener;

#[async_trait]
impl CallListener for StubListener {
    async fn on_state_changed(&self, _state: &str) {}
    async fn on_participant_joined(&self, _participant: ParticipantRecord) {}
    async fn on_participant_left(&self, _participant: ParticipantRecord) {}
    async fn on_remote_speaker_playable(&self, _participant: ParticipantRecord) {}
    async fn on_call_ended(&self, _reason: &str) {}
}

/// Queued listener notification.
#[derive(Debug)]
pub(crate) enum ListenerEvent {
    StateChanged(CallSessionState),
    ParticipantJoined(ParticipantRecord),
    ParticipantLeft(ParticipantRecord),
    RemoteSpeakerPlayable(ParticipantRecord),
    CallEnded(String),
}

impl ListenerEvent {
    pub(crate) async fn deliver(self, listener: &dyn CallListener) {
        match self {
            ListenerEvent::StateChanged(state) => listener.on_state_changed(state.as_str()).await,
            ListenerEvent::ParticipantJoined(record) => {
                listener.on_participant_joined(record).await
            }
            ListenerEvent::ParticipantLeft(record) => listener.on_participant_left(record).await,
            ListenerEvent::RemoteSpeakerPlayable(record) => {
                listener.on_remote_speaker_playable(record).await
            }
            ListenerEvent::CallEnded(reason) => listener.on_call_ended(&reason).await,
        }
    }
}
