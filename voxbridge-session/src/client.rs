use std::sync::Arc;

use crate::{
    InputSettings, LeftReason, Participant, SessionError, SubscriptionProfiles, VirtualMicrophone,
    VirtualSpeaker,
};

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    pub session_id: String,
    /// Participants already present when the join completed, local included.
    pub participants: Vec<Participant>,
}

/// Receiver of session events.
///
/// Events are delivered on a runtime-owned thread. Implementations must return
/// quickly and must not block on audio or network work.
pub trait EventHandler: Send + Sync {
    fn on_joined(&self, result: Result<JoinInfo, SessionError>);
    fn on_inputs_updated(&self, result: Result<InputSettings, SessionError>);
    fn on_participant_joined(&self, participant: Participant);
    fn on_participant_updated(&self, participant: Participant);
    fn on_participant_left(&self, participant: Participant, reason: LeftReason);
}

/// Handle to one remote call.
///
/// `join` and `update_inputs` complete asynchronously through the
/// [`EventHandler`] the client was created with.
pub trait CallClient: Send + Sync {
    fn join(&self, meeting_url: &str);
    fn update_inputs(&self, inputs: InputSettings);
    fn update_subscription_profiles(&self, profiles: SubscriptionProfiles);
    fn send_app_message(&self, message: &str) -> Result<(), SessionError>;
    fn leave(&self);
}

/// Process-wide runtime: virtual devices and client construction.
pub trait SessionRuntime: Send + Sync {
    fn create_microphone_device(
        &self,
        name: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn VirtualMicrophone>, SessionError>;

    fn create_speaker_device(
        &self,
        name: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn VirtualSpeaker>, SessionError>;

    /// Route remote audio to the speaker device called `name`.
    fn select_speaker_device(&self, name: &str) -> Result<(), SessionError>;

    fn create_client(&self, handler: Arc<dyn EventHandler>) -> Arc<dyn CallClient>;
}
