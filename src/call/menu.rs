use super::calendar;
use super::ivr_config::{IvrConfig, Menu, MenuOption, AFTER_HOURS_MENU_ID, MAIN_MENU_ID};
use chrono::{DateTime, Utc};

/// Read-only view over the menus of one [`IvrConfig`].
#[derive(Debug, Clone, Copy)]
pub struct MenuCatalog<'a> {
    config: &'a IvrConfig,
}

impl<'a> MenuCatalog<'a> {
    pub fn new(config: &'a IvrConfig) -> Self {
        Self { config }
    }

    /// The main menu during business hours, otherwise the after-hours menu.
    pub fn active_menu(&self, now: DateTime<Utc>) -> &'a Menu {
        self.menu_for(self.is_after_hours(now))
    }

    pub fn is_after_hours(&self, now: DateTime<Utc>) -> bool {
        !calendar::is_open(&self.config.business_hours, now)
    }

    pub fn menu_for(&self, after_hours: bool) -> &'a Menu {
        if after_hours {
            &self.config.after_hours_menu
        } else {
            &self.config.main_menu
        }
    }

    /// Looks a menu up by id. `main` and `after_hours` always resolve to the
    /// top-level menus even if the configured ids differ.
    pub fn menu_by_id(&self, id: &str) -> Option<&'a Menu> {
        if let Some(menu) = self.config.menus().find(|menu| menu.id == id) {
            return Some(menu);
        }
        match id {
            MAIN_MENU_ID => Some(&self.config.main_menu),
            AFTER_HOURS_MENU_ID => Some(&self.config.after_hours_menu),
            _ => None,
        }
    }

    /// Exact match on the pressed digit. `None` means invalid input.
    pub fn resolve_option<'m>(menu: &'m Menu, digit: &str) -> Option<&'m MenuOption> {
        menu.options.iter().find(|option| option.digit == digit)
    }
}
