use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
}

/// Transient message shown to the user after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    /// How long a notification stays on screen.
    pub const DISPLAY_FOR: Duration = Duration::from_secs(3);

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, message)
    }

    fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            NotificationKind::Success => info!(notification = %message),
            NotificationKind::Warning => warn!(notification = %message),
            NotificationKind::Error => error!(notification = %message),
        }
        Self { kind, message }
    }

    pub fn is_error(&self) -> bool {
        self.kind == NotificationKind::Error
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            NotificationKind::Success => "ok",
            NotificationKind::Warning => "warn",
            NotificationKind::Error => "error",
        };
        write!(f, "[{}] {}", label, self.message)
    }
}

/// Notifications currently on screen. Each one is removed
/// `Notification::DISPLAY_FOR` after it was shown.
#[derive(Debug, Default)]
pub struct NotificationArea {
    shown: VecDeque<(Instant, Notification)>,
}

impl NotificationArea {
    pub fn show(&mut self, note: Notification, now: Instant) {
        self.shown.push_back((now + Notification::DISPLAY_FOR, note));
    }

    /// Deadline of the oldest notification still showing.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.shown.front().map(|(until, _)| *until)
    }

    /// Remove and return every notification whose time is up.
    pub fn expire(&mut self, now: Instant) -> Vec<Notification> {
        let mut gone = Vec::new();
        while let Some((until, _)) = self.shown.front() {
            if *until > now {
                break;
            }
            if let Some((_, note)) = self.shown.pop_front() {
                gone.push(note);
            }
        }
        gone
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shown.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_labels() {
        assert_eq!(Notification::success("saved").to_string(), "[ok] saved");
        assert_eq!(Notification::warning("updated").to_string(), "[warn] updated");
        assert_eq!(Notification::error("broken").to_string(), "[error] broken");
    }

    #[test]
    fn notifications_close_after_three_seconds() {
        let t0 = Instant::now();
        let mut area = NotificationArea::default();
        assert_eq!(area.next_expiry(), None);

        area.show(Notification::success("Image data collected!"), t0);
        area.show(Notification::warning("Image updated with new data"), t0 + Duration::from_secs(1));
        assert_eq!(area.next_expiry(), Some(t0 + Duration::from_secs(3)));

        assert!(area.expire(t0 + Duration::from_millis(2999)).is_empty());
        assert_eq!(area.len(), 2);

        let gone = area.expire(t0 + Duration::from_secs(3));
        assert_eq!(gone, [Notification::success("Image data collected!")]);
        assert_eq!(area.next_expiry(), Some(t0 + Duration::from_secs(4)));

        assert_eq!(area.expire(t0 + Duration::from_secs(10)).len(), 1);
        assert_eq!(area.len(), 0);
    }
}
