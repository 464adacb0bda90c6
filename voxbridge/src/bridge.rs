use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::{JoinHandle, spawn_blocking};
use voxbridge_session::SessionRuntime;

use crate::aec::{AecForwarder, EchoCancellationStage};
use crate::api::{ApiClient, CallInfo, StartOptions};
use crate::audio::{AudioCaptureProducer, AudioPlaybackConsumer, CaptureSink, CpalAudio, LocalAudio};
use crate::call::{CallListener, CallSessionController, CallSessionState, StubListener};
use crate::config::{BridgeConfig, IoMode};
use crate::{Error, Result};

/// Connects the local microphone and speaker to a hosted voice call.
pub struct Bridge {
    config: BridgeConfig,
    runtime: Arc<dyn SessionRuntime>,
    audio: Arc<dyn LocalAudio>,
    listener: Arc<dyn CallListener>,
    session: TokioMutex<Option<Arc<CallSessionController>>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, runtime: Arc<dyn SessionRuntime>) -> Result<Self> {
        config.validate()?;
        let audio = Arc::new(CpalAudio::new(&config.audio));
        Ok(Self {
            config,
            runtime,
            audio,
            listener: Arc::new(StubListener),
            session: TokioMutex::new(None),
        })
    }

    pub fn with_local_audio(mut self, audio: Arc<dyn LocalAudio>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_listener<L>(mut self, listener: Arc<L>) -> Self
    where
        L: CallListener + 'static,
    {
        self.listener = listener as Arc<dyn CallListener>;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Create a web call for `options` and join it.
    pub async fn start(&self, options: StartOptions) -> Result<CallInfo> {
        let target = options.into_target()?;
        let api_key = self
            .config
            .api
            .key
            .clone()
            .ok_or_else(|| Error::Configuration("API key is not configured".into()))?;
        let api = ApiClient::new(self.config.api.url.clone(), api_key);
        let call = api.create_web_call(&target).await?;
        tracing::info!(call_id = %call.id, "Joining call");
        self.join(&call.web_call_url).await?;
        Ok(call)
    }

    /// Join an existing call by URL.
    ///
    /// Everything that can fail synchronously (virtual devices, local devices)
    /// happens before any audio unit is spawned.
    pub async fn join(&self, meeting_url: &str) -> Result<Arc<CallSessionController>> {
        let mut current = self.session.lock().await;
        if let Some(session) = current.as_ref() {
            if session.state() != CallSessionState::Left {
                return Err(Error::Configuration("a call is already active".into()));
            }
        }

        let format = self.config.audio.format();
        let session_config = &self.config.session;
        let stage = if self.config.aec.enabled {
            Some(EchoCancellationStage::from_config(&self.config.aec, format)?)
        } else {
            None
        };

        let microphone = self.runtime.create_microphone_device(
            &session_config.microphone_name,
            format.sample_rate,
            format.channels,
        )?;
        let speaker = self.runtime.create_speaker_device(
            &session_config.speaker_name,
            format.sample_rate,
            format.channels,
        )?;
        self.runtime
            .select_speaker_device(&session_config.speaker_name)?;

        let controller = CallSessionController::new(
            self.runtime.as_ref(),
            session_config.clone(),
            self.listener.clone(),
        )?;
        let gate = controller.gate();
        let quit = controller.quit_flag();
        let join_timeout = session_config.join_timeout();

        let (sink, reference, forwarder) = match stage {
            Some(stage) => {
                let sink = CaptureSink::EchoCanceller(stage.capture_handle());
                let reference = stage.reference_handle();
                let forwarder =
                    AecForwarder::new(stage, microphone, gate.clone(), quit.clone(), format)
                        .with_join_timeout(join_timeout);
                (sink, Some(reference), Some(forwarder))
            }
            None => (CaptureSink::Microphone(microphone), None, None),
        };
        let capture = AudioCaptureProducer::new(format, sink, gate.clone(), quit.clone())
            .with_join_timeout(join_timeout);
        let playback = AudioPlaybackConsumer::new(format, speaker, reference, gate, quit);

        let io_mode = self.config.audio.io_mode;
        tracing::info!(?io_mode, aec = forwarder.is_some(), "Starting audio units");
        let mut units: Vec<JoinHandle<()>> = match io_mode {
            IoMode::Blocking => {
                let input = self.audio.open_input(format).await?;
                let output = self.audio.open_output(format).await?;
                vec![
                    spawn_blocking(move || {
                        capture.run(input);
                    }),
                    spawn_blocking(move || {
                        playback.run(output);
                    }),
                ]
            }
            IoMode::Callback => {
                self.audio
                    .start_callbacks(format, capture, playback)
                    .await?
            }
        };
        if let Some(forwarder) = forwarder {
            units.push(spawn_blocking(move || {
                forwarder.run();
            }));
        }
        controller.attach_units(units);

        // Join first so an early input completion always finds the session joining.
        controller.join(meeting_url)?;
        controller.update_subscription_profiles();
        controller.configure_local_inputs(&session_config.microphone_name, session_config.constraints);

        *current = Some(controller.clone());
        Ok(controller)
    }

    /// Leave the active call, if any. Idempotent.
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.leave().await;
        }
    }

    /// Send a structured message to the active call. Delivery failures are
    /// logged only.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let session = self.session().await.ok_or_else(|| {
            Error::Configuration("no active call to send the message to".into())
        })?;
        session.send_app_message(payload);
        Ok(())
    }

    pub async fn session(&self) -> Option<Arc<CallSessionController>> {
        self.session.lock().await.clone()
    }
}
