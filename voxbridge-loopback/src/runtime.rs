use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use voxbridge_session::{
    CallClient, EventHandler, InputSettings, JoinInfo, LeftReason, Participant, SessionError,
    SessionRuntime, SubscriptionProfiles, VirtualMicrophone, VirtualSpeaker,
};

use crate::{LoopbackMicrophone, LoopbackSpeaker};

/// In-process session runtime.
///
/// Join and input updates complete on a spawned thread, the way a hosted
/// runtime delivers completions on its own thread. Everything the bridge
/// sends is recorded so it can be inspected afterwards, and participant
/// events can be injected at any time.
#[derive(Clone, Default)]
pub struct LoopbackRuntime {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<Script>,
    microphones: Mutex<HashMap<String, Arc<Mutex<Vec<Vec<u8>>>>>>,
    speakers: Mutex<HashMap<String, Arc<Mutex<VecDeque<u8>>>>>,
    selected_speaker: Mutex<Option<String>>,
    handler: Mutex<Option<Arc<dyn EventHandler>>>,
    record: Mutex<Record>,
}

#[derive(Default)]
struct Script {
    join_error: Option<String>,
    inputs_error: Option<String>,
    app_message_error: Option<String>,
    hold_join: bool,
    completion_delay: Duration,
    participants: Vec<Participant>,
}

#[derive(Default)]
struct Record {
    join_urls: Vec<String>,
    inputs: Vec<InputSettings>,
    subscription_profiles: Vec<SubscriptionProfiles>,
    app_messages: Vec<String>,
    leave_count: usize,
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next join complete with `error`.
    pub fn fail_join(self, error: &str) -> Self {
        self.inner.script.lock().join_error = Some(error.to_string());
        self
    }

    /// Make input updates complete with `error`.
    pub fn fail_inputs(self, error: &str) -> Self {
        self.inner.script.lock().inputs_error = Some(error.to_string());
        self
    }

    /// Make every `send_app_message` fail with `error`.
    pub fn fail_app_messages(self, error: &str) -> Self {
        self.inner.script.lock().app_message_error = Some(error.to_string());
        self
    }

    /// Do not complete joins until [`complete_join`](Self::complete_join) is called.
    pub fn hold_join(self) -> Self {
        self.inner.script.lock().hold_join = true;
        self
    }

    /// Delay every asynchronous completion by `delay`.
    pub fn with_completion_delay(self, delay: Duration) -> Self {
        self.inner.script.lock().completion_delay = delay;
        self
    }

    /// Participants reported as already present when a join completes.
    pub fn with_participants(self, participants: Vec<Participant>) -> Self {
        self.inner.script.lock().participants = participants;
        self
    }

    /// Complete a held join now, on a runtime thread.
    pub fn complete_join(&self) {
        self.deliver_join();
    }

    pub fn emit_participant_joined(&self, participant: Participant) {
        self.emit(move |handler| handler.on_participant_joined(participant));
    }

    pub fn emit_participant_updated(&self, participant: Participant) {
        self.emit(move |handler| handler.on_participant_updated(participant));
    }

    pub fn emit_participant_left(&self, participant: Participant, reason: LeftReason) {
        self.emit(move |handler| handler.on_participant_left(participant, reason));
    }

    /// Queue remote audio on the speaker device called `name`.
    pub fn push_speaker_audio(&self, name: &str, bytes: &[u8]) {
        let queue = self.speaker_queue(name);
        queue.lock().extend(bytes.iter().copied());
    }

    /// Every buffer written to the microphone device called `name`, in order.
    pub fn microphone_writes(&self, name: &str) -> Vec<Vec<u8>> {
        self.microphone_log(name).lock().clone()
    }

    pub fn selected_speaker(&self) -> Option<String> {
        self.inner.selected_speaker.lock().clone()
    }

    pub fn join_urls(&self) -> Vec<String> {
        self.inner.record.lock().join_urls.clone()
    }

    pub fn inputs(&self) -> Vec<InputSettings> {
        self.inner.record.lock().inputs.clone()
    }

    pub fn subscription_profiles(&self) -> Vec<SubscriptionProfiles> {
        self.inner.record.lock().subscription_profiles.clone()
    }

    pub fn app_messages(&self) -> Vec<String> {
        self.inner.record.lock().app_messages.clone()
    }

    pub fn leave_count(&self) -> usize {
        self.inner.record.lock().leave_count
    }

    fn microphone_log(&self, name: &str) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.inner
            .microphones
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn speaker_queue(&self, name: &str) -> Arc<Mutex<VecDeque<u8>>> {
        self.inner
            .speakers
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Run `f` against the registered handler on a separate thread and wait
    /// for it, so injected events behave like runtime callbacks but stay
    /// ordered with respect to the caller.
    fn emit<F>(&self, f: F)
    where
        F: FnOnce(&dyn EventHandler) + Send + 'static,
    {
        let Some(handler) = self.inner.handler.lock().clone() else {
            tracing::warn!("No client registered, dropping event");
            return;
        };
        let thread = std::thread::spawn(move || f(handler.as_ref()));
        if thread.join().is_err() {
            tracing::error!("Event handler panicked");
        }
    }

    fn deliver_join(&self) {
        let Some(handler) = self.inner.handler.lock().clone() else {
            tracing::warn!("No client registered, dropping join completion");
            return;
        };
        let (result, delay) = {
            let script = self.inner.script.lock();
            let result = match &script.join_error {
                Some(error) => Err(SessionError::Join(error.clone())),
                None => Ok(JoinInfo {
                    session_id: format!("loopback-{}", self.join_urls().len()),
                    participants: script.participants.clone(),
                }),
            };
            (result, script.completion_delay)
        };
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            handler.on_joined(result);
        });
    }
}

impl SessionRuntime for LoopbackRuntime {
    fn create_microphone_device(
        &self,
        name: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn VirtualMicrophone>, SessionError> {
        if sample_rate == 0 || channels == 0 {
            return Err(SessionError::Device(format!(
                "invalid microphone format {sample_rate} Hz / {channels} ch"
            )));
        }
        tracing::debug!(name, sample_rate, channels, "Creating microphone device");
        Ok(Box::new(LoopbackMicrophone::new(
            name,
            channels,
            self.microphone_log(name),
        )))
    }

    fn create_speaker_device(
        &self,
        name: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn VirtualSpeaker>, SessionError> {
        if sample_rate == 0 || channels == 0 {
            return Err(SessionError::Device(format!(
                "invalid speaker format {sample_rate} Hz / {channels} ch"
            )));
        }
        tracing::debug!(name, sample_rate, channels, "Creating speaker device");
        Ok(Box::new(LoopbackSpeaker::new(
            name,
            channels,
            self.speaker_queue(name),
        )))
    }

    fn select_speaker_device(&self, name: &str) -> Result<(), SessionError> {
        if !self.inner.speakers.lock().contains_key(name) {
            return Err(SessionError::Device(format!("no speaker device '{name}'")));
        }
        *self.inner.selected_speaker.lock() = Some(name.to_string());
        Ok(())
    }

    fn create_client(&self, handler: Arc<dyn EventHandler>) -> Arc<dyn CallClient> {
        *self.inner.handler.lock() = Some(handler);
        Arc::new(LoopbackClient {
            runtime: self.clone(),
        })
    }
}

struct LoopbackClient {
    runtime: LoopbackRuntime,
}

impl CallClient for LoopbackClient {
    fn join(&self, meeting_url: &str) {
        let inner = &self.runtime.inner;
        inner.record.lock().join_urls.push(meeting_url.to_string());
        tracing::debug!(meeting_url, "Join requested");
        if !inner.script.lock().hold_join {
            self.runtime.deliver_join();
        }
    }

    fn update_inputs(&self, inputs: InputSettings) {
        let inner = &self.runtime.inner;
        inner.record.lock().inputs.push(inputs.clone());
        let Some(handler) = inner.handler.lock().clone() else {
            return;
        };
        let (result, delay) = {
            let script = inner.script.lock();
            let result = match &script.inputs_error {
                Some(error) => Err(SessionError::InputsUpdate(error.clone())),
                None => Ok(inputs),
            };
            (result, script.completion_delay)
        };
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            handler.on_inputs_updated(result);
        });
    }

    fn update_subscription_profiles(&self, profiles: SubscriptionProfiles) {
        self.runtime
            .inner
            .record
            .lock()
            .subscription_profiles
            .push(profiles);
    }

    fn send_app_message(&self, message: &str) -> Result<(), SessionError> {
        let inner = &self.runtime.inner;
        if let Some(error) = &inner.script.lock().app_message_error {
            return Err(SessionError::AppMessage(error.clone()));
        }
        inner.record.lock().app_messages.push(message.to_string());
        Ok(())
    }

    fn leave(&self) {
        let inner = &self.runtime.inner;
        inner.record.lock().leave_count += 1;
        inner.handler.lock().take();
        tracing::debug!("Left session");
    }
}
