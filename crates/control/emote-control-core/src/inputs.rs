//! Commands queued from other threads and applied at the next tick boundary.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::binding::{ParameterDescriptor, Role};
use crate::error::{ControlError, Result};
use crate::mixer::ClipHandle;
use crate::physics::PhysicsGroup;

fn default_speed() -> f32 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Command {
    PlayPrimary {
        clip: String,
        #[serde(default = "default_speed")]
        speed: f32,
        #[serde(default)]
        transition_ms: f32,
    },
    PlayDifferential {
        slot: String,
        clip: String,
        #[serde(default = "default_speed")]
        speed: f32,
        #[serde(default)]
        fade_ms: f32,
    },
    Stop {
        handle: ClipHandle,
        #[serde(default)]
        fade_ms: f32,
    },
    SetSpeed {
        handle: ClipHandle,
        speed: f32,
    },
    Reset,
    SetWind {
        strength: f32,
        direction: f32,
    },
    SetSwayGain {
        factor: f32,
    },
    SetGroupGain {
        group: PhysicsGroup,
        factor: f32,
    },
    ApplyDrag {
        dx: f32,
        dy: f32,
    },
    SetTimeConstants {
        attack_ms: f32,
        release_ms: f32,
    },
    StopLipSync,
    EditBinding {
        name: String,
        descriptor: ParameterDescriptor,
    },
    ReassignRole {
        role: Role,
        name: String,
    },
    SetParameter {
        name: String,
        value: f32,
        #[serde(default)]
        duration_ms: f32,
    },
    ClearParameter {
        name: String,
    },
    LookAt {
        x: f32,
        y: f32,
    },
    ClearLookAt,
}

impl Command {
    /// Short label used in rejection events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Command::PlayPrimary { .. } => "play_primary",
            Command::PlayDifferential { .. } => "play_differential",
            Command::Stop { .. } => "stop",
            Command::SetSpeed { .. } => "set_speed",
            Command::Reset => "reset",
            Command::SetWind { .. } => "set_wind",
            Command::SetSwayGain { .. } => "set_sway_gain",
            Command::SetGroupGain { .. } => "set_group_gain",
            Command::ApplyDrag { .. } => "apply_drag",
            Command::SetTimeConstants { .. } => "set_time_constants",
            Command::StopLipSync => "stop_lip_sync",
            Command::EditBinding { .. } => "edit_binding",
            Command::ReassignRole { .. } => "reassign_role",
            Command::SetParameter { .. } => "set_parameter",
            Command::ClearParameter { .. } => "clear_parameter",
            Command::LookAt { .. } => "look_at",
            Command::ClearLookAt => "clear_look_at",
        }
    }
}

/// Cloneable handle for queueing commands into a running engine.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    pub fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| ControlError::invalid("engine is no longer running"))
    }

    pub fn play_primary(&self, clip: &str, speed: f32, transition_ms: f32) -> Result<()> {
        self.send(Command::PlayPrimary {
            clip: clip.to_string(),
            speed,
            transition_ms,
        })
    }

    pub fn play_differential(&self, slot: &str, clip: &str, speed: f32, fade_ms: f32) -> Result<()> {
        self.send(Command::PlayDifferential {
            slot: slot.to_string(),
            clip: clip.to_string(),
            speed,
            fade_ms,
        })
    }

    pub fn stop(&self, handle: ClipHandle, fade_ms: f32) -> Result<()> {
        self.send(Command::Stop { handle, fade_ms })
    }

    pub fn apply_drag(&self, dx: f32, dy: f32) -> Result<()> {
        self.send(Command::ApplyDrag { dx, dy })
    }

    pub fn set_parameter(&self, name: &str, value: f32, duration_ms: f32) -> Result<()> {
        self.send(Command::SetParameter {
            name: name.to_string(),
            value,
            duration_ms,
        })
    }

    pub fn look_at(&self, x: f32, y: f32) -> Result<()> {
        self.send(Command::LookAt { x, y })
    }
}

pub(crate) fn command_channel() -> (CommandSender, Receiver<Command>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (CommandSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_defaults() {
        let cmd: Command =
            serde_json::from_str(r#"{ "PlayPrimary": { "clip": "idle" } }"#).unwrap();
        assert_eq!(
            cmd,
            Command::PlayPrimary {
                clip: "idle".into(),
                speed: 1.0,
                transition_ms: 0.0
            }
        );
        let cmd: Command =
            serde_json::from_str(r#"{ "Stop": { "handle": { "slot": "face" } } }"#).unwrap();
        assert_eq!(cmd.label(), "stop");
        let cmd: Command =
            serde_json::from_str(r#"{ "SetParameter": { "name": "head_LR", "value": 12 } }"#)
                .unwrap();
        assert_eq!(
            cmd,
            Command::SetParameter {
                name: "head_LR".into(),
                value: 12.0,
                duration_ms: 0.0
            }
        );
    }

    #[test]
    fn sender_fails_once_receiver_is_gone() {
        let (tx, rx) = command_channel();
        tx.apply_drag(1.0, 0.0).unwrap();
        assert_eq!(rx.try_recv().unwrap().label(), "apply_drag");
        drop(rx);
        assert!(tx.send(Command::Reset).is_err());
    }
}
