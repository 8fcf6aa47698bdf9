pub mod composer;
pub mod sink;

pub use composer::{test_notification, Composer};
pub use sink::{DiscordWebhook, NotificationSink};
