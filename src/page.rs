use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::collector::CollectorHandle;
use crate::notify::Notification;
use crate::parser::{Extractor, Page};

const DISABLED_MESSAGE: &str = "Collection is disabled. Enable it in the extension popup.";
/// How long the trigger shows its "collected" look after a new record.
const FLASH_FOR: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appearance {
    Idle,
    Collected,
}

/// The floating "Collect Data" control.
#[derive(Debug, Clone)]
pub struct Trigger {
    /// Body generation the trigger was appended to.
    body: u64,
    visible: bool,
    flash_until: Option<Instant>,
}

impl Trigger {
    pub const LABEL: &'static str = "Collect Data";

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn appearance_at(&self, now: Instant) -> Appearance {
        match self.flash_until {
            Some(until) if now < until => Appearance::Collected,
            _ => Appearance::Idle,
        }
    }

    /// When the "collected" look is due to end, if it is showing.
    pub fn flash_ends_at(&self) -> Option<Instant> {
        self.flash_until
    }

    /// Drop an elapsed flash. Returns true when the look changed back.
    fn settle(&mut self, now: Instant) -> bool {
        match self.flash_until {
            Some(until) if now >= until => {
                self.flash_until = None;
                true
            }
            _ => false,
        }
    }
}

/// Owns the on-page side: current page, trigger, and the activation flow.
pub struct PageController<E> {
    extractor: E,
    collector: CollectorHandle,
    enabled: watch::Receiver<bool>,
    page: Option<Page>,
    /// Bumped whenever the page body is replaced wholesale.
    body: u64,
    trigger: Option<Trigger>,
}

impl<E: Extractor> PageController<E> {
    pub fn new(extractor: E, collector: CollectorHandle, enabled: watch::Receiver<bool>) -> Self {
        Self {
            extractor,
            collector,
            enabled,
            page: None,
            body: 0,
            trigger: None,
        }
    }

    /// First load of a page: show the page and mount the trigger.
    pub fn load(&mut self, page: Page) {
        info!("page loaded: {}", page.address());
        self.page = Some(page);
        self.mount_trigger();
    }

    /// Client-side navigation. Swapping the body drops the trigger with it;
    /// the body watch then notices the change and re-creates it. Returns
    /// true when the trigger had to be re-created.
    pub fn navigate(&mut self, page: Page) -> bool {
        info!("navigated to {}", page.address());
        self.page = Some(page);
        self.body += 1;
        self.observe_body()
    }

    /// Structural watch on the body's direct children.
    fn observe_body(&mut self) -> bool {
        if self.is_mounted() {
            return false;
        }
        debug!("trigger missing from body, re-creating");
        self.mount_trigger();
        true
    }

    pub fn is_mounted(&self) -> bool {
        self.trigger.as_ref().is_some_and(|t| t.body == self.body)
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref().filter(|t| t.body == self.body)
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    /// End the trigger's "collected" look once its time is up.
    pub fn settle_trigger(&mut self, now: Instant) -> bool {
        self.trigger
            .as_mut()
            .filter(|t| t.body == self.body)
            .is_some_and(|t| t.settle(now))
    }

    /// Receiver for waiting on setting changes from outside.
    pub fn enabled_changes(&self) -> watch::Receiver<bool> {
        self.enabled.clone()
    }

    /// Re-read the live setting and show or hide the trigger.
    pub fn sync_visibility(&mut self) -> bool {
        let enabled = *self.enabled.borrow_and_update();
        if let Some(trigger) = self.trigger.as_mut() {
            trigger.visible = enabled;
        }
        enabled
    }

    fn mount_trigger(&mut self) {
        if self.is_mounted() {
            return;
        }
        self.trigger = Some(Trigger {
            body: self.body,
            visible: false,
            flash_until: None,
        });
        self.sync_visibility();
    }

    /// Handle a click on the trigger.
    pub async fn activate(&mut self) -> Notification {
        debug!("Collect button clicked");
        let enabled = *self.enabled.borrow();
        if !enabled {
            return Notification::error(DISABLED_MESSAGE);
        }

        let Some(page) = self.page.as_ref() else {
            return Notification::error("No page loaded");
        };
        let record = match self.extractor.extract(page) {
            Ok(record) => record,
            Err(e) => {
                warn!("extraction failed: {}", e);
                return Notification::error("Failed to extract data from page");
            }
        };

        match self.collector.collect(record).await {
            Err(e) => Notification::error(format!("Extension error: {}", e)),
            Ok(reply) if !reply.success => Notification::error("Failed to save data"),
            Ok(reply) if reply.is_duplicate => Notification::warning("Image updated with new data"),
            Ok(_) => {
                if let Some(trigger) = self.trigger.as_mut() {
                    trigger.flash_until = Some(Instant::now() + FLASH_FOR);
                }
                Notification::success("Image data collected!")
            }
        }
    }
}

// ── Tests ──
