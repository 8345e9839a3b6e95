//! Email delivery for notifications.
//!
//! - [`render`] turns a notification into subject, HTML and plain text.
//! - [`transport`] hands a rendered message to SMTP or an HTTP email API.
//! - [`email`] is the rate-limited, paced channel used for batch relays.

pub mod email;
pub mod render;
pub mod transport;
