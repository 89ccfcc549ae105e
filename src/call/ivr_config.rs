//! Per-tenant IVR configuration.
//!
//! Parsed from TOML (one file per tenant phone number, see
//! [`crate::call::config_store::FileConfigStore`]) or built in code. The
//! controller only ever reads it.
//!
//! # Example
//!
//! ```toml
//! enabled = true
//!
//! [business_hours]
//! timezone = "America/New_York"
//! holidays = ["2024-12-25"]
//!
//! [business_hours.week_schedule.monday]
//! open = "09:00"
//! close = "17:00"
//!
//! [main_menu]
//! id = "main"
//! welcome_message = "Press 1 for sales."
//! timeout_message = "We did not receive your selection."
//! invalid_message = "That is not a valid option."
//! timeout_seconds = 5
//! max_retries = 3
//!
//! [[main_menu.options]]
//! digit = "1"
//! action = "transfer"
//! destination = "+15550001000"
//! ```

use super::calendar::{BusinessHoursConfig, ClockTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub const MAIN_MENU_ID: &str = "main";
pub const AFTER_HOURS_MENU_ID: &str = "after_hours";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IvrConfigError {
    #[error("invalid time '{0}': expected HH:MM between 00:00 and 24:00")]
    InvalidTime(String),
    #[error("{day} opens at {open} but closes at {close}")]
    EmptyWindow {
        day: String,
        open: ClockTime,
        close: ClockTime,
    },
    #[error("menu id must not be empty")]
    EmptyMenuId,
    #[error("menu '{0}' is defined more than once")]
    DuplicateMenu(String),
    #[error("menu '{menu}' must wait at least one second for input")]
    ZeroTimeout { menu: String },
    #[error("menu '{menu}' maps digit '{digit}' more than once")]
    DuplicateDigit { menu: String, digit: String },
    #[error("menu '{menu}' uses '{digit}', expected a single digit 0-9")]
    InvalidDigit { menu: String, digit: String },
    #[error("transfer option '{digit}' in menu '{menu}' has no destination")]
    MissingDestination { menu: String, digit: String },
    #[error("submenu option '{digit}' in menu '{menu}' has no submenu_id")]
    MissingSubmenu { menu: String, digit: String },
    #[error("submenu option '{digit}' in menu '{menu}' points at unknown menu '{target}'")]
    UnknownSubmenu {
        menu: String,
        digit: String,
        target: String,
    },
}

/// What happens when the caller presses an option's digit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MenuAction {
    Transfer,
    Queue,
    Voicemail,
    Submenu,
    Appointment,
    /// An action name this build does not know about.
    Other(String),
}

impl MenuAction {
    pub fn as_str(&self) -> &str {
        match self {
            MenuAction::Transfer => "transfer",
            MenuAction::Queue => "queue",
            MenuAction::Voicemail => "voicemail",
            MenuAction::Submenu => "submenu",
            MenuAction::Appointment => "appointment",
            MenuAction::Other(name) => name,
        }
    }
}

impl From<String> for MenuAction {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "transfer" => MenuAction::Transfer,
            "queue" => MenuAction::Queue,
            "voicemail" => MenuAction::Voicemail,
            "submenu" => MenuAction::Submenu,
            "appointment" => MenuAction::Appointment,
            _ => MenuAction::Other(value),
        }
    }
}

impl From<MenuAction> for String {
    fn from(value: MenuAction) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    pub digit: String,
    pub action: MenuAction,
    #[serde(default)]
    pub destination: Option<String>,
    /// Spoken before the action executes.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub submenu_id: Option<String>,
}

impl MenuOption {
    pub fn new(digit: impl Into<String>, action: MenuAction) -> Self {
        Self {
            digit: digit.into(),
            action,
            destination: None,
            message: None,
            submenu_id: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_submenu(mut self, submenu_id: impl Into<String>) -> Self {
        self.submenu_id = Some(submenu_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: String,
    pub welcome_message: String,
    pub timeout_message: String,
    pub invalid_message: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub options: Vec<MenuOption>,
}

impl Menu {
    fn validate(&self, menu_ids: &HashSet<&str>) -> Result<(), IvrConfigError> {
        if self.id.trim().is_empty() {
            return Err(IvrConfigError::EmptyMenuId);
        }
        if self.timeout_seconds == 0 {
            return Err(IvrConfigError::ZeroTimeout {
                menu: self.id.clone(),
            });
        }

        let mut digits = HashSet::new();
        for option in &self.options {
            let valid_digit =
                option.digit.len() == 1 && option.digit.chars().all(|c| c.is_ascii_digit());
            if !valid_digit {
                return Err(IvrConfigError::InvalidDigit {
                    menu: self.id.clone(),
                    digit: option.digit.clone(),
                });
            }
            if !digits.insert(option.digit.as_str()) {
                return Err(IvrConfigError::DuplicateDigit {
                    menu: self.id.clone(),
                    digit: option.digit.clone(),
                });
            }
            match option.action {
                MenuAction::Transfer if option.destination.is_none() => {
                    return Err(IvrConfigError::MissingDestination {
                        menu: self.id.clone(),
                        digit: option.digit.clone(),
                    });
                }
                MenuAction::Submenu => {
                    let target =
                        option
                            .submenu_id
                            .as_deref()
                            .ok_or_else(|| IvrConfigError::MissingSubmenu {
                                menu: self.id.clone(),
                                digit: option.digit.clone(),
                            })?;
                    if !menu_ids.contains(target) {
                        return Err(IvrConfigError::UnknownSubmenu {
                            menu: self.id.clone(),
                            digit: option.digit.clone(),
                            target: target.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_voice_name")]
    pub voice_name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_name: default_voice_name(),
            language: default_language(),
            speed: default_speed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRole {
    Sales,
    Support,
    Billing,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferNumbers {
    #[serde(default)]
    pub sales: Option<String>,
    #[serde(default)]
    pub support: Option<String>,
    #[serde(default)]
    pub billing: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

impl TransferNumbers {
    pub fn get(&self, role: TransferRole) -> Option<&str> {
        match role {
            TransferRole::Sales => self.sales.as_deref(),
            TransferRole::Support => self.support.as_deref(),
            TransferRole::Billing => self.billing.as_deref(),
            TransferRole::Operator => self.operator.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub voicemail_enabled: bool,
    #[serde(default = "default_true")]
    pub appointment_scheduling_enabled: bool,
    #[serde(default)]
    pub call_recording_enabled: bool,
    #[serde(default)]
    pub transcription_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            voicemail_enabled: true,
            appointment_scheduling_enabled: true,
            call_recording_enabled: false,
            transcription_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvrConfig {
    /// When false callers skip the menus and go straight to the operator.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub business_hours: BusinessHoursConfig,
    pub main_menu: Menu,
    pub after_hours_menu: Menu,
    #[serde(default)]
    pub submenus: Vec<Menu>,
    #[serde(default)]
    pub voice_settings: VoiceSettings,
    #[serde(default)]
    pub transfer_numbers: TransferNumbers,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
}

impl IvrConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read IVR config '{}': {}", path.display(), e)
        })?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Invalid IVR config '{}': {}", path.display(), e))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: IvrConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn menus(&self) -> impl Iterator<Item = &Menu> {
        [&self.main_menu, &self.after_hours_menu]
            .into_iter()
            .chain(self.submenus.iter())
    }

    pub fn validate(&self) -> Result<(), IvrConfigError> {
        self.business_hours.validate()?;

        let mut menu_ids = HashSet::new();
        for menu in self.menus() {
            if !menu_ids.insert(menu.id.as_str()) {
                return Err(IvrConfigError::DuplicateMenu(menu.id.clone()));
            }
        }
        for menu in self.menus() {
            menu.validate(&menu_ids)?;
        }
        Ok(())
    }
}

impl Default for IvrConfig {
    fn default() -> Self {
        let transfer_numbers = TransferNumbers {
            sales: Some("+15550100001".to_string()),
            support: Some("+15550100002".to_string()),
            billing: Some("+15550100003".to_string()),
            operator: Some("+15550100000".to_string()),
        };
        let transfer_to = |digit: &str, role: TransferRole, message: &str| {
            let mut option = MenuOption::new(digit, MenuAction::Transfer).with_message(message);
            option.destination = transfer_numbers.get(role).map(str::to_string);
            option
        };

        let main_menu = Menu {
            id: MAIN_MENU_ID.to_string(),
            welcome_message: "Thank you for calling. Press 1 for sales, 2 for support, \
                              3 for billing, 4 to schedule an appointment, \
                              or 0 to speak with an operator."
                .to_string(),
            timeout_message: "We did not receive your selection.".to_string(),
            invalid_message: "Sorry, that is not a valid option.".to_string(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            options: vec![
                transfer_to("1", TransferRole::Sales, "Connecting you to sales."),
                transfer_to("2", TransferRole::Support, "Connecting you to support."),
                transfer_to("3", TransferRole::Billing, "Connecting you to billing."),
                MenuOption::new("4", MenuAction::Appointment).with_message(
                    "We will text you a link to schedule your appointment. Goodbye.",
                ),
                transfer_to("0", TransferRole::Operator, "Connecting you to an operator."),
            ],
        };

        let after_hours_menu = Menu {
            id: AFTER_HOURS_MENU_ID.to_string(),
            welcome_message: "Thank you for calling. Our office is currently closed. \
                              Press 1 to leave a voicemail, 2 to receive a scheduling link \
                              by text message, or 0 to reach the on-call operator."
                .to_string(),
            timeout_message: "We did not receive your selection.".to_string(),
            invalid_message: "Sorry, that is not a valid option.".to_string(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            options: vec![
                MenuOption::new("1", MenuAction::Voicemail)
                    .with_message("Please leave your message after the tone."),
                MenuOption::new("2", MenuAction::Appointment).with_message(
                    "We will text you a link to schedule your appointment. Goodbye.",
                ),
                transfer_to("0", TransferRole::Operator, "Connecting you to an operator."),
            ],
        };

        Self {
            enabled: true,
            business_hours: BusinessHoursConfig::default(),
            main_menu,
            after_hours_menu,
            submenus: Vec::new(),
            voice_settings: VoiceSettings::default(),
            transfer_numbers,
            feature_flags: FeatureFlags::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_voice_name() -> String {
    "Amy".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_speed() -> f32 {
    1.0
}
