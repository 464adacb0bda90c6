use serde::{Deserialize, Serialize};

use crate::SubscriptionState;

/// Acoustic processing the remote side should apply to the microphone track.
///
/// These are requests to the runtime's own processing and are independent of
/// any local echo cancellation. `None` leaves the runtime default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MicrophoneConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_gain_control: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_suppression: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<bool>,
}

impl MicrophoneConstraints {
    pub fn is_empty(&self) -> bool {
        self.auto_gain_control.is_none()
            && self.noise_suppression.is_none()
            && self.echo_cancellation.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrophoneSettings {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_constraints: Option<MicrophoneConstraints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrophoneInput {
    pub is_enabled: bool,
    pub settings: MicrophoneSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInput {
    pub is_enabled: bool,
}

/// Input configuration sent with `update_inputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSettings {
    pub camera: CameraInput,
    pub microphone: MicrophoneInput,
}

impl InputSettings {
    /// Camera off, microphone enabled and mapped to the virtual device `device_id`.
    pub fn microphone(device_id: impl Into<String>, constraints: MicrophoneConstraints) -> Self {
        Self {
            camera: CameraInput { is_enabled: false },
            microphone: MicrophoneInput {
                is_enabled: true,
                settings: MicrophoneSettings {
                    device_id: device_id.into(),
                    custom_constraints: (!constraints.is_empty()).then_some(constraints),
                },
            },
        }
    }

    pub fn device_id(&self) -> &str {
        &self.microphone.settings.device_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSubscription {
    pub camera: SubscriptionState,
    pub microphone: SubscriptionState,
}

/// Subscription profiles sent with `update_subscription_profiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionProfiles {
    pub base: MediaSubscription,
}

impl Default for SubscriptionProfiles {
    /// Audio only: remote microphones subscribed, cameras not.
    fn default() -> Self {
        Self {
            base: MediaSubscription {
                camera: SubscriptionState::Unsubscribed,
                microphone: SubscriptionState::Subscribed,
            },
        }
    }
}
