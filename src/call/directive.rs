//! Carrier-agnostic call-control directives.
//!
//! A [`DirectiveList`] is the whole synchronous answer to a carrier webhook:
//! an ordered script of speak / collect-input / connect / record steps.
//! Every compile operation here is pure and total.

use super::ivr_config::{Menu, MenuAction, MenuOption, TransferNumbers, VoiceSettings};
use serde::{Deserialize, Serialize};

pub const HOLD_MESSAGE: &str = "Please hold while we connect your call.";
pub const INVALID_SELECTION_MESSAGE: &str = "Sorry, that selection is not available.";
pub const VOICEMAIL_CLOSING_MESSAGE: &str = "Thank you for your message. Goodbye.";
pub const GOODBYE_MESSAGE: &str = "We were unable to process your selection. Goodbye.";
pub const TECHNICAL_DIFFICULTIES_MESSAGE: &str =
    "We are experiencing technical difficulties. Please try again later.";

const VOICEMAIL_FORMAT: &str = "mp3";
const VOICEMAIL_END_ON_SILENCE_SECONDS: u32 = 3;
const VOICEMAIL_END_ON_KEY: &str = "#";
const VOICEMAIL_MAX_DURATION_SECONDS: u32 = 120;

pub type DirectiveList = Vec<Directive>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    Speak(SpeakDirective),
    CollectInput(CollectInputDirective),
    Connect(ConnectDirective),
    Record(RecordDirective),
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::Speak(_) => "speak",
            Directive::CollectInput(_) => "collect_input",
            Directive::Connect(_) => "connect",
            Directive::Record(_) => "record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakDirective {
    pub text: String,
    pub voice_name: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectInputDirective {
    pub timeout_seconds: u32,
    pub max_digits: u32,
    pub submit_on_hash: bool,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectDirective {
    pub destination_phone: String,
    pub callback_url: String,
}

/// Without end conditions the carrier records the rest of the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDirective {
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_on_silence_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_on_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<u32>,
    pub play_beep: bool,
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transcription: bool,
}

/// Where the carrier should send the follow-up events for a directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub input: String,
    pub event: String,
    pub recording: String,
}

impl CallbackUrls {
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            input: format!("{base}/ivr/input"),
            event: format!("{base}/ivr/event"),
            recording: format!("{base}/ivr/recording"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectiveCompiler {
    callbacks: CallbackUrls,
}

impl DirectiveCompiler {
    pub fn new(callbacks: CallbackUrls) -> Self {
        Self { callbacks }
    }

    /// Welcome message followed by a single-digit input collection.
    pub fn compile_menu_presentation(&self, menu: &Menu, voice: &VoiceSettings) -> DirectiveList {
        vec![
            speak(&menu.welcome_message, voice),
            self.collect_input(menu),
        ]
    }

    pub fn compile_option(&self, option: &MenuOption, voice: &VoiceSettings) -> DirectiveList {
        match option.action {
            MenuAction::Transfer => {
                let Some(destination) = option.destination.as_deref() else {
                    return vec![speak(INVALID_SELECTION_MESSAGE, voice)];
                };
                vec![
                    speak(option.message.as_deref().unwrap_or(HOLD_MESSAGE), voice),
                    self.connect(destination),
                ]
            }
            MenuAction::Appointment | MenuAction::Queue => {
                vec![speak(option.message.as_deref().unwrap_or(HOLD_MESSAGE), voice)]
            }
            MenuAction::Voicemail => vec![
                speak(
                    option
                        .message
                        .as_deref()
                        .unwrap_or("Please leave your message after the tone."),
                    voice,
                ),
                Directive::Record(RecordDirective {
                    format: VOICEMAIL_FORMAT.to_string(),
                    end_on_silence_seconds: Some(VOICEMAIL_END_ON_SILENCE_SECONDS),
                    end_on_key: Some(VOICEMAIL_END_ON_KEY.to_string()),
                    max_duration_seconds: Some(VOICEMAIL_MAX_DURATION_SECONDS),
                    play_beep: true,
                    callback_url: self.callbacks.recording.clone(),
                    transcription: false,
                }),
                speak(VOICEMAIL_CLOSING_MESSAGE, voice),
            ],
            // submenus need the catalog and are presented through `compile_submenu`
            MenuAction::Submenu | MenuAction::Other(_) => {
                vec![speak(INVALID_SELECTION_MESSAGE, voice)]
            }
        }
    }

    /// Optional option message, then the submenu's own presentation.
    pub fn compile_submenu(
        &self,
        option: &MenuOption,
        submenu: &Menu,
        voice: &VoiceSettings,
    ) -> DirectiveList {
        let mut directives = Vec::with_capacity(3);
        if let Some(message) = option.message.as_deref() {
            directives.push(speak(message, voice));
        }
        directives.extend(self.compile_menu_presentation(submenu, voice));
        directives
    }

    pub fn compile_invalid_input(&self, menu: &Menu, voice: &VoiceSettings) -> DirectiveList {
        vec![speak(&menu.invalid_message, voice), self.collect_input(menu)]
    }

    pub fn compile_input_timeout(&self, menu: &Menu, voice: &VoiceSettings) -> DirectiveList {
        vec![speak(&menu.timeout_message, voice), self.collect_input(menu)]
    }

    /// Used when the tenant has the menu system switched off.
    pub fn compile_disabled_fallback(
        &self,
        transfer_numbers: &TransferNumbers,
        voice: &VoiceSettings,
    ) -> DirectiveList {
        match transfer_numbers.operator.as_deref() {
            Some(operator) => vec![speak(HOLD_MESSAGE, voice), self.connect(operator)],
            None => Self::fallback(),
        }
    }

    /// The caller ran out of attempts on a menu.
    pub fn compile_retries_exhausted(
        &self,
        transfer_numbers: &TransferNumbers,
        voice: &VoiceSettings,
    ) -> DirectiveList {
        match transfer_numbers.operator.as_deref() {
            Some(operator) => vec![speak(HOLD_MESSAGE, voice), self.connect(operator)],
            None => vec![speak(GOODBYE_MESSAGE, voice)],
        }
    }

    /// Whole-call recording, placed ahead of a connect.
    pub fn compile_call_recording(&self) -> Directive {
        Directive::Record(RecordDirective {
            format: VOICEMAIL_FORMAT.to_string(),
            end_on_silence_seconds: None,
            end_on_key: None,
            max_duration_seconds: None,
            play_beep: false,
            callback_url: self.callbacks.recording.clone(),
            transcription: false,
        })
    }

    /// The only script the carrier gets when something went wrong internally.
    pub fn fallback() -> DirectiveList {
        vec![speak(
            TECHNICAL_DIFFICULTIES_MESSAGE,
            &VoiceSettings::default(),
        )]
    }

    fn collect_input(&self, menu: &Menu) -> Directive {
        Directive::CollectInput(CollectInputDirective {
            timeout_seconds: menu.timeout_seconds,
            max_digits: 1,
            submit_on_hash: false,
            callback_url: self.callbacks.input.clone(),
        })
    }

    fn connect(&self, destination: &str) -> Directive {
        Directive::Connect(ConnectDirective {
            destination_phone: destination.to_string(),
            callback_url: self.callbacks.event.clone(),
        })
    }
}

fn speak(text: &str, voice: &VoiceSettings) -> Directive {
    Directive::Speak(SpeakDirective {
        text: text.to_string(),
        voice_name: voice.voice_name.clone(),
        language: voice.language.clone(),
        speed: (voice.speed != 1.0).then_some(voice.speed),
    })
}
