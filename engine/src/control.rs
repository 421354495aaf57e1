//! Control Plane types - privileged one-shot mutations of shared engine
//! state. Parsing lives here; the engine applies the actions after its
//! privilege gate.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("actor is not privileged for control actions")]
    NotPrivileged,

    #[error("unknown control action '{0}'")]
    UnknownAction(String),

    #[error("control payload missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runtime-editable configuration scalars, persisted immediately on edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    WelcomeText,
    MessageSuffix,
    DailyCeiling,
    Caption,
}

impl ConfigKey {
    pub fn as_scalar_key(&self) -> &'static str {
        match self {
            Self::WelcomeText => "welcome_text",
            Self::MessageSuffix => "message_suffix",
            Self::DailyCeiling => "daily_ceiling",
            Self::Caption => "caption",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "welcome_text" => Some(Self::WelcomeText),
            "message_suffix" => Some(Self::MessageSuffix),
            "daily_ceiling" => Some(Self::DailyCeiling),
            "caption" => Some(Self::Caption),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Block { target: String },
    Unblock { target: String },
    /// Mark the target's in-flight job cancelled; picked up at the next
    /// per-unit checkpoint, never preemptively.
    Cancel { target: String },
    SetConfig { key: ConfigKey, value: String },
    Broadcast { message: String },
    Stats,
}

impl ControlAction {
    pub fn parse(action: &str, payload: &serde_json::Value) -> Result<Self, ControlError> {
        let target = || {
            payload
                .get("target")
                .and_then(|v| v.as_str())
                .map(ToString::to_string)
                .ok_or(ControlError::MissingField("target"))
        };

        match action {
            "block" => Ok(Self::Block { target: target()? }),
            "unblock" => Ok(Self::Unblock { target: target()? }),
            "cancel" => Ok(Self::Cancel { target: target()? }),
            "set-config" => {
                let raw_key = payload
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or(ControlError::MissingField("key"))?;
                let key = ConfigKey::parse(raw_key)
                    .ok_or_else(|| ControlError::InvalidValue("key", raw_key.to_string()))?;
                let value = payload
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or(ControlError::MissingField("value"))?
                    .to_string();
                Ok(Self::SetConfig { key, value })
            }
            "broadcast" => {
                let message = payload
                    .get("message")
                    .and_then(|v| v.as_str())
                    .ok_or(ControlError::MissingField("message"))?
                    .to_string();
                Ok(Self::Broadcast { message })
            }
            "stats" => Ok(Self::Stats),
            other => Err(ControlError::UnknownAction(other.to_string())),
        }
    }
}
