use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use voxbridge_session::{
    CallClient, EventHandler, InputSettings, JoinInfo, LeftReason, MicrophoneConstraints,
    Participant, SessionError, SessionRuntime, SubscriptionProfiles,
};

use super::listener::ListenerEvent;
use super::{CallListener, CallSessionState, ParticipantRecord};
use crate::config::SessionConfig;
use crate::gate::ReadinessGate;
use crate::{Error, Result};

/// Message sent once the remote speaker's audio reaches us.
const PLAYABLE_MESSAGE: &str = "playable";

#[derive(Default)]
struct SessionInner {
    state: CallSessionState,
    session_id: Option<String>,
    participants: HashMap<String, ParticipantRecord>,
    /// Id of the participant identified as the remote speaker.
    remote_speaker: Option<String>,
    speaker_playable: bool,
    playable_sent: bool,
    last_error: Option<SessionError>,
}

/// Owns one remote call: join and leave, participant tracking, the readiness
/// gate and the quit flag shared with the audio units.
pub struct CallSessionController {
    client: Arc<dyn CallClient>,
    config: SessionConfig,
    gate: Arc<ReadinessGate>,
    quit: Arc<AtomicBool>,
    inner: Mutex<SessionInner>,
    units: Mutex<Vec<JoinHandle<()>>>,
    left: TokioMutex<bool>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    runtime: Handle,
    this: Weak<Self>,
}

/// Forwards session events without keeping the controller alive.
struct SessionEvents(Weak<CallSessionController>);

impl EventHandler for SessionEvents {
    fn on_joined(&self, result: std::result::Result<JoinInfo, SessionError>) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_joined(result);
        }
    }

    fn on_inputs_updated(&self, result: std::result::Result<InputSettings, SessionError>) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_inputs_updated(result);
        }
    }

    fn on_participant_joined(&self, participant: Participant) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_participant_joined(participant);
        }
    }

    fn on_participant_updated(&self, participant: Participant) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_participant_updated(participant);
        }
    }

    fn on_participant_left(&self, participant: Participant, reason: LeftReason) {
        if let Some(controller) = self.0.upgrade() {
            controller.on_participant_left(participant, reason);
        }
    }
}

impl CallSessionController {
    /// Create the controller and its session client. Must be called from
    /// within a tokio runtime.
    pub fn new(
        runtime: &dyn SessionRuntime,
        config: SessionConfig,
        listener: Arc<dyn CallListener>,
    ) -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|_| {
            Error::Configuration("call session must be created inside a tokio runtime".into())
        })?;
        let (events, mut rx) = mpsc::unbounded_channel::<ListenerEvent>();
        handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                event.deliver(listener.as_ref()).await;
            }
        });
        let controller = Arc::new_cyclic(|this: &Weak<Self>| {
            let client = runtime.create_client(Arc::new(SessionEvents(this.clone())));
            Self {
                client,
                config,
                gate: Arc::new(ReadinessGate::new()),
                quit: Arc::new(AtomicBool::new(false)),
                inner: Mutex::new(SessionInner::default()),
                units: Mutex::new(Vec::new()),
                left: TokioMutex::new(false),
                events,
                runtime: handle,
                this: this.clone(),
            }
        });
        Ok(controller)
    }

    /// Request the remote join. Completion arrives through
    /// [`EventHandler::on_joined`].
    pub fn join(&self, meeting_url: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state != CallSessionState::Idle {
                return Err(Error::Configuration(format!(
                    "cannot join a call session in state {}",
                    inner.state
                )));
            }
            inner.state = CallSessionState::Joining;
        }
        self.emit(ListenerEvent::StateChanged(CallSessionState::Joining));
        tracing::info!(url = %meeting_url, "Joining call");
        self.client.join(meeting_url);
        Ok(())
    }

    /// Map the session's microphone to the virtual device `device_id`, with
    /// the camera off.
    pub fn configure_local_inputs(&self, device_id: &str, constraints: MicrophoneConstraints) {
        tracing::debug!(device_id, ?constraints, "Configuring session inputs");
        self.client
            .update_inputs(InputSettings::microphone(device_id, constraints));
    }

    /// Subscribe to remote microphones and not to cameras.
    pub fn update_subscription_profiles(&self) {
        self.client
            .update_subscription_profiles(SubscriptionProfiles::default());
    }

    /// Serialize `payload` to JSON and send it to the call. Failures are
    /// logged only.
    pub fn send_app_message<T: Serialize + ?Sized>(&self, payload: &T) {
        if let Err(err) = self.try_send_app_message(payload) {
            tracing::warn!("Failed to send app message: {}", err);
        }
    }

    pub fn try_send_app_message<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let message = serde_json::to_string(payload)
            .map_err(|e| Error::MessageDelivery(format!("Failed to serialize payload: {}", e)))?;
        self.client
            .send_app_message(&message)
            .map_err(|e| Error::MessageDelivery(e.to_string()))
    }

    /// Hand over the audio units to await on leave. Units attached after the
    /// call was left are told to quit right away.
    pub fn attach_units(&self, units: Vec<JoinHandle<()>>) {
        self.units.lock().extend(units);
        if self.state() == CallSessionState::Left {
            self.quit.store(true, Ordering::Release);
        }
    }

    /// Stop the audio units, wait for them and leave the call. Idempotent.
    pub async fn leave(&self) {
        self.leave_with_reason("left").await;
    }

    async fn leave_with_reason(&self, reason: &str) {
        let mut left = self.left.lock().await;
        if *left {
            return;
        }
        *left = true;
        tracing::info!(reason, "Leaving call");
        self.quit.store(true, Ordering::Release);
        if self.gate.poll().is_none() {
            // Release units still waiting to start.
            self.gate.signal_failed();
        }
        let units = std::mem::take(&mut *self.units.lock());
        for unit in units {
            if let Err(err) = unit.await {
                tracing::error!("Audio unit failed: {}", err);
            }
        }
        self.client.leave();
        {
            let mut inner = self.inner.lock();
            inner.participants.clear();
            inner.remote_speaker = None;
            inner.speaker_playable = false;
            inner.state = CallSessionState::Left;
        }
        self.emit(ListenerEvent::StateChanged(CallSessionState::Left));
        self.emit(ListenerEvent::CallEnded(reason.to_string()));
        tracing::info!("Call left");
    }

    /// Wait until audio may flow. Fails with the recorded session error when
    /// the call could not be set up, or when `timeout` expires.
    pub async fn ready(&self, timeout: Duration) -> Result<()> {
        let gate = self.gate.clone();
        let ready = tokio::task::spawn_blocking(move || gate.wait_timeout(timeout))
            .await
            .map_err(|e| Error::Join(e.to_string()))?;
        if ready {
            return Ok(());
        }
        Err(self
            .last_error()
            .unwrap_or_else(|| Error::Join("session not ready".into())))
    }

    pub fn state(&self) -> CallSessionState {
        self.inner.lock().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    /// Known participants, ordered by id.
    pub fn participants(&self) -> Vec<ParticipantRecord> {
        let mut participants: Vec<_> = self.inner.lock().participants.values().cloned().collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));
        participants
    }

    pub fn last_error(&self) -> Option<Error> {
        self.inner.lock().last_error.clone().map(|err| match err {
            SessionError::Join(message) => Error::Join(message),
            other => Error::Session(other),
        })
    }

    pub fn gate(&self) -> Arc<ReadinessGate> {
        self.gate.clone()
    }

    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    pub fn is_remote_speaker_playable(&self) -> bool {
        self.inner.lock().speaker_playable
    }

    fn set_state(&self, inner: &mut SessionInner, state: CallSessionState) {
        if inner.state != state {
            tracing::info!(from = %inner.state, to = %state, "Call session state changed");
            inner.state = state;
            self.emit(ListenerEvent::StateChanged(state));
        }
    }

    /// Once a speaker is tracked only its id matches. The display name is
    /// used to pick the first one.
    fn is_remote_speaker(&self, inner: &SessionInner, record: &ParticipantRecord) -> bool {
        match &inner.remote_speaker {
            Some(id) => *id == record.id,
            None => !record.is_local && record.display_name == self.config.remote_speaker_name,
        }
    }

    fn track(&self, inner: &mut SessionInner, record: &ParticipantRecord) -> bool {
        let is_speaker = self.is_remote_speaker(inner, record);
        if is_speaker && inner.remote_speaker.is_none() {
            tracing::debug!(id = %record.id, "Tracking remote speaker");
            inner.remote_speaker = Some(record.id.clone());
        }
        inner.participants.insert(record.id.clone(), record.clone());
        is_speaker
    }

    fn emit(&self, event: ListenerEvent) {
        let _ = self.events.send(event);
    }
}

impl EventHandler for CallSessionController {
    fn on_joined(&self, result: std::result::Result<JoinInfo, SessionError>) {
        let mut inner = self.inner.lock();
        if inner.state != CallSessionState::Joining {
            tracing::debug!(state = %inner.state, "Ignoring join completion");
            return;
        }
        match result {
            Ok(info) => {
                tracing::info!(session_id = %info.session_id, "Joined call");
                inner.session_id = Some(info.session_id);
                for participant in &info.participants {
                    let record = ParticipantRecord::from(participant);
                    self.track(&mut inner, &record);
                }
                self.set_state(&mut inner, CallSessionState::Joined);
                drop(inner);
                self.gate.signal_joined();
            }
            Err(err) => {
                tracing::error!("Failed to join call: {}", err);
                inner.last_error = Some(err);
                self.set_state(&mut inner, CallSessionState::Failed);
                drop(inner);
                self.gate.signal_failed();
            }
        }
    }

    fn on_inputs_updated(&self, result: std::result::Result<InputSettings, SessionError>) {
        match result {
            Ok(inputs) => {
                tracing::debug!(device_id = inputs.device_id(), "Session inputs configured");
                self.gate.signal_inputs_configured();
            }
            Err(err) => {
                tracing::error!("Failed to configure session inputs: {}", err);
                {
                    let mut inner = self.inner.lock();
                    inner.last_error.get_or_insert(err);
                    if inner.state != CallSessionState::Left {
                        self.set_state(&mut inner, CallSessionState::Failed);
                    }
                }
                self.gate.signal_failed();
            }
        }
    }

    fn on_participant_joined(&self, participant: Participant) {
        let record = ParticipantRecord::from(&participant);
        tracing::info!(id = %record.id, name = %record.display_name, "Participant joined");
        self.track(&mut self.inner.lock(), &record);
        self.emit(ListenerEvent::ParticipantJoined(record));
    }

    fn on_participant_updated(&self, participant: Participant) {
        let record = ParticipantRecord::from(&participant);
        let send_playable = {
            let mut inner = self.inner.lock();
            let is_speaker = self.track(&mut inner, &record);
            if !is_speaker {
                return;
            }
            let audible = record.is_audible();
            let edge = audible && !inner.speaker_playable;
            inner.speaker_playable = audible;
            let first = edge && !inner.playable_sent;
            if first {
                inner.playable_sent = true;
            }
            first
        };
        if send_playable {
            tracing::info!(id = %record.id, "Remote speaker is playable");
            if let Err(err) = self.client.send_app_message(PLAYABLE_MESSAGE) {
                tracing::warn!("Failed to send playable message: {}", err);
            }
            self.emit(ListenerEvent::RemoteSpeakerPlayable(record));
        }
    }

    fn on_participant_left(&self, participant: Participant, reason: LeftReason) {
        let record = ParticipantRecord::from(&participant);
        tracing::info!(id = %record.id, ?reason, "Participant left");
        let is_speaker = {
            let mut inner = self.inner.lock();
            let is_speaker = self.is_remote_speaker(&inner, &record);
            inner.participants.remove(&record.id);
            if is_speaker {
                inner.speaker_playable = false;
            }
            is_speaker
        };
        self.emit(ListenerEvent::ParticipantLeft(record));
        if !is_speaker {
            return;
        }
        // Leaving awaits the audio units, so it cannot run on the event thread.
        self.quit.store(true, Ordering::Release);
        if let Some(this) = self.this.upgrade() {
            self.runtime.spawn(async move {
                this.leave_with_reason("remote speaker left").await;
            });
        }
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::Release);
        if self.gate.poll().is_none() {
            self.gate.signal_failed();
        }
    }
}
