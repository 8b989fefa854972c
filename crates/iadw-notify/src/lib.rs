//! Change notifications: render a [`iadw_core::ChangeReport`] and deliver it.

pub mod email;
pub mod log;
pub mod templating;
pub mod traits;

pub use email::{EmailConfig, EmailNotifier};
pub use log::{LogNotifier, MemoryNotifier};
pub use templating::{render_notification, ALERT_SUBJECT};
pub use traits::{Notification, Notifier, NotifyError};

pub const CRATE_NAME: &str = "iadw-notify";
