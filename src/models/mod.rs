use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

pub mod dashboard;
pub mod event;
pub mod permissions;
pub mod resource;
pub mod user;

pub const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
pub const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");

/// Placeholder for timestamps missing from records written by older versions.
pub fn unknown_time() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}
