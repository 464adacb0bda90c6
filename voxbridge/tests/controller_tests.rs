use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use voxbridge::call::{
    CallListener, CallSessionController, CallSessionState, ParticipantRecord, StubListener,
};
use voxbridge::config::SessionConfig;
use voxbridge::session::{
    LeftReason, MicrophoneConstraints, Participant, PlaybackState, SessionError,
    SubscriptionState,
};
use voxbridge::Error;
use voxbridge_loopback::LoopbackRuntime;

const MEETING_URL: &str = "https://calls.example.test/room-2";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("voxbridge=debug,voxbridge_loopback=debug")
        .with_test_writer()
        .try_init();
}

/// Collects listener callbacks as short strings.
#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl CallListener for RecordingListener {
    async fn on_state_changed(&self, state: &str) {
        self.events.lock().push(format!("state:{state}"));
    }

    async fn on_participant_joined(&self, participant: ParticipantRecord) {
        self.events.lock().push(format!("joined:{}", participant.id));
    }

    async fn on_participant_left(&self, participant: ParticipantRecord) {
        self.events.lock().push(format!("left:{}", participant.id));
    }

    async fn on_remote_speaker_playable(&self, participant: ParticipantRecord) {
        self.events.lock().push(format!("playable:{}", participant.id));
    }

    async fn on_call_ended(&self, reason: &str) {
        self.events.lock().push(format!("ended:{reason}"));
    }
}

fn speaker() -> Participant {
    Participant::new("bot-1", "Vapi Speaker")
}

fn audible(participant: Participant) -> Participant {
    participant.with_microphone(SubscriptionState::Subscribed, PlaybackState::Playable)
}

fn controller(
    runtime: &LoopbackRuntime,
    listener: Arc<dyn CallListener>,
) -> Arc<CallSessionController> {
    CallSessionController::new(runtime, SessionConfig::default(), listener).unwrap()
}

async fn joined(runtime: &LoopbackRuntime) -> Arc<CallSessionController> {
    let session = controller(runtime, Arc::new(StubListener));
    session.join(MEETING_URL).unwrap();
    session.configure_local_inputs("my-mic", MicrophoneConstraints::default());
    session.ready(Duration::from_secs(2)).await.unwrap();
    session
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {what}");
}

#[tokio::test]
async fn test_new_requires_tokio_runtime() {
    let runtime = LoopbackRuntime::new();
    let result = std::thread::spawn(move || {
        CallSessionController::new(&runtime, SessionConfig::default(), Arc::new(StubListener))
            .map(|_| ())
    })
    .join()
    .unwrap();
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_join_records_initial_participants() {
    init_tracing();
    let runtime = LoopbackRuntime::new().with_participants(vec![
        Participant::new("local-1", "me").local(),
        speaker(),
    ]);
    let session = joined(&runtime).await;

    assert_eq!(session.state(), CallSessionState::Joined);
    let ids: Vec<String> = session.participants().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["bot-1".to_string(), "local-1".to_string()]);
    assert!(!session.is_remote_speaker_playable());
    session.leave().await;
}

#[tokio::test]
async fn test_join_is_only_allowed_once() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = joined(&runtime).await;

    assert!(matches!(
        session.join(MEETING_URL),
        Err(Error::Configuration(_))
    ));
    assert_eq!(runtime.join_urls().len(), 1);
    session.leave().await;
    assert!(matches!(
        session.join(MEETING_URL),
        Err(Error::Configuration(_))
    ));
}

#[tokio::test]
async fn test_playable_message_is_sent_once() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = joined(&runtime).await;

    runtime.emit_participant_joined(speaker());
    runtime.emit_participant_updated(
        speaker().with_microphone(SubscriptionState::Subscribed, PlaybackState::Loading),
    );
    assert!(runtime.app_messages().is_empty());

    runtime.emit_participant_updated(audible(speaker()));
    assert!(session.is_remote_speaker_playable());
    runtime.emit_participant_updated(audible(speaker()));
    // Falling back and recovering does not announce again.
    runtime.emit_participant_updated(
        speaker().with_microphone(SubscriptionState::Subscribed, PlaybackState::Interrupted),
    );
    assert!(!session.is_remote_speaker_playable());
    runtime.emit_participant_updated(audible(speaker()));

    assert_eq!(runtime.app_messages(), vec!["playable".to_string()]);
    session.leave().await;
}

#[tokio::test]
async fn test_other_participants_do_not_trigger_playable() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = joined(&runtime).await;

    runtime.emit_participant_updated(audible(Participant::new("guest-1", "Guest")));
    // A local participant with the speaker's name is not the remote speaker.
    runtime.emit_participant_updated(audible(Participant::new("local-1", "Vapi Speaker").local()));

    assert!(runtime.app_messages().is_empty());
    assert!(!session.is_remote_speaker_playable());
    session.leave().await;
}

#[tokio::test]
async fn test_remote_speaker_leaving_ends_the_call() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let listener = Arc::new(RecordingListener::default());
    let session = controller(&runtime, listener.clone());
    session.join(MEETING_URL).unwrap();
    session.configure_local_inputs("my-mic", MicrophoneConstraints::default());
    session.ready(Duration::from_secs(2)).await.unwrap();

    runtime.emit_participant_joined(speaker());
    runtime.emit_participant_updated(audible(speaker()));
    runtime.emit_participant_left(speaker(), LeftReason::LeftCall);

    wait_for("call to end", || session.state() == CallSessionState::Left).await;
    assert_eq!(runtime.leave_count(), 1);
    assert!(session.participants().is_empty());
    wait_for("listener", || {
        listener.events().iter().any(|e| e.starts_with("ended:"))
    })
    .await;
    assert_eq!(
        listener.events(),
        vec![
            "state:joining",
            "state:joined",
            "joined:bot-1",
            "playable:bot-1",
            "left:bot-1",
            "state:left",
            "ended:remote speaker left",
        ]
    );

    // A later explicit leave is a no-op.
    session.leave().await;
    assert_eq!(runtime.leave_count(), 1);
}

#[tokio::test]
async fn test_other_participant_leaving_keeps_the_call() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = joined(&runtime).await;

    runtime.emit_participant_joined(speaker());
    runtime.emit_participant_joined(Participant::new("guest-1", "Guest"));
    runtime.emit_participant_left(Participant::new("guest-1", "Guest"), LeftReason::Hidden);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.state(), CallSessionState::Joined);
    assert_eq!(runtime.leave_count(), 0);
    let ids: Vec<String> = session.participants().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["bot-1".to_string()]);
    session.leave().await;
}

#[tokio::test]
async fn test_second_participant_with_speaker_name_is_not_tracked() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = joined(&runtime).await;

    runtime.emit_participant_joined(speaker());
    runtime.emit_participant_updated(audible(speaker()));
    assert!(session.is_remote_speaker_playable());

    let impostor = Participant::new("bot-2", "Vapi Speaker");
    runtime.emit_participant_joined(impostor.clone());
    runtime.emit_participant_updated(
        impostor
            .clone()
            .with_microphone(SubscriptionState::Subscribed, PlaybackState::Interrupted),
    );
    assert!(session.is_remote_speaker_playable());

    runtime.emit_participant_left(impostor, LeftReason::LeftCall);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), CallSessionState::Joined);
    assert_eq!(runtime.leave_count(), 0);
    let ids: Vec<String> = session.participants().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["bot-1".to_string()]);

    runtime.emit_participant_left(speaker(), LeftReason::LeftCall);
    wait_for("call to end", || session.state() == CallSessionState::Left).await;
    assert_eq!(runtime.leave_count(), 1);
}

#[tokio::test]
async fn test_leave_is_idempotent() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let listener = Arc::new(RecordingListener::default());
    let session = controller(&runtime, listener.clone());
    session.join(MEETING_URL).unwrap();
    session.configure_local_inputs("my-mic", MicrophoneConstraints::default());
    session.ready(Duration::from_secs(2)).await.unwrap();

    tokio::join!(session.leave(), session.leave());
    session.leave().await;

    assert_eq!(runtime.leave_count(), 1);
    assert_eq!(session.state(), CallSessionState::Left);
    assert!(session.quit_flag().load(std::sync::atomic::Ordering::Acquire));
    wait_for("listener", || {
        listener.events().iter().any(|e| e.starts_with("ended:"))
    })
    .await;
    let ended = listener
        .events()
        .into_iter()
        .filter(|e| e.starts_with("ended:"))
        .count();
    assert_eq!(ended, 1);
}

#[tokio::test]
async fn test_leave_before_join_completes_releases_waiters() {
    init_tracing();
    let runtime = LoopbackRuntime::new().hold_join();
    let session = controller(&runtime, Arc::new(StubListener));
    session.join(MEETING_URL).unwrap();

    let gate = session.gate();
    let waiter = tokio::task::spawn_blocking(move || gate.wait());
    session.leave().await;
    assert!(!waiter.await.unwrap());

    runtime.complete_join();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), CallSessionState::Left);
}

#[tokio::test]
async fn test_input_failure_fails_the_session() {
    init_tracing();
    let runtime = LoopbackRuntime::new().fail_inputs("no such device");
    let session = controller(&runtime, Arc::new(StubListener));
    session.join(MEETING_URL).unwrap();
    session.configure_local_inputs("my-mic", MicrophoneConstraints::default());

    let err = session.ready(Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Session(SessionError::InputsUpdate(ref message)) if message == "no such device"
    ));
    // The join completion may arrive later and must not revive the call.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), CallSessionState::Failed);
    assert!(session.gate().flags().failed);
    session.leave().await;
}

#[tokio::test]
async fn test_ready_times_out_without_inputs() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = controller(&runtime, Arc::new(StubListener));
    session.join(MEETING_URL).unwrap();

    let err = session.ready(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, Error::Join(_)));
    // Expiry alone does not fail the gate.
    assert!(!session.gate().flags().failed);
    assert!(session.gate().flags().joined);
    session.leave().await;
}

#[tokio::test]
async fn test_app_messages_are_serialized_to_json() {
    init_tracing();
    let runtime = LoopbackRuntime::new();
    let session = joined(&runtime).await;

    session.send_app_message(&json!({"type": "add-message", "message": {"role": "system"}}));
    session.try_send_app_message("hello").unwrap();

    let messages = runtime.app_messages();
    assert_eq!(messages.len(), 2);
    let first: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
    assert_eq!(first, json!({"type": "add-message", "message": {"role": "system"}}));
    assert_eq!(messages[1], r#""hello""#);
    session.leave().await;
}

#[tokio::test]
async fn test_failed_app_message_is_reported_by_try_send() {
    init_tracing();
    let runtime = LoopbackRuntime::new().fail_app_messages("channel closed");
    let session = joined(&runtime).await;

    // Logged only.
    session.send_app_message(&json!({"type": "say"}));
    let err = session.try_send_app_message(&json!({"type": "say"})).unwrap_err();
    assert!(matches!(err, Error::MessageDelivery(ref message) if message.contains("channel closed")));
    assert_eq!(session.state(), CallSessionState::Joined);
    session.leave().await;
}
