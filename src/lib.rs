pub use portfolio_voice_types as types;
pub use portfolio_voice_utils as utils;

pub mod answer;
pub mod capture;
pub mod config;
pub mod consts;
pub mod context;
pub mod controller;
pub mod playback;
pub mod synthesis;
pub mod transcription;
pub mod ui;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use context::{AssistantContext, VoiceServices};
pub use controller::{Command, ControllerHandle, ConversationController};
pub use ui::{ConversationUi, TapPrompt, TapTrigger};
