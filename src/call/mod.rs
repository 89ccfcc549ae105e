pub mod calendar;
pub mod config_store;
pub mod controller;
pub mod directive;
pub mod dispatch;
pub mod ivr_config;
pub mod menu;
pub mod session;

pub use calendar::{is_open, BusinessHoursConfig, ClockTime, DaySchedule, WeekSchedule};
pub use config_store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use controller::{CallProgress, IvrController, IvrControllerBuilder};
pub use directive::{CallbackUrls, Directive, DirectiveCompiler, DirectiveList};
pub use dispatch::{DispatchManager, DispatchManagerBuilder, Dispatcher, LogDispatcher, SideEffect};
pub use ivr_config::{IvrConfig, IvrConfigError, Menu, MenuAction, MenuOption};
pub use menu::MenuCatalog;
pub use session::{CallSession, CallSessionStore, CallStatus, MemoryCallSessionStore};
