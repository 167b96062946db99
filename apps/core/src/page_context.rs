use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::bridge::{ChannelError, MessageBridge};
use crate::contract::{ControlAck, ControlSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    ShowAndFocus,
    Hide,
    FocusExisting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayState {
    visible: bool,
    mounted: bool,
}

impl OverlayState {
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Mounts the overlay on first use.
    pub fn on_hotkey(&mut self, has_focus: bool) -> HotkeyAction {
        if !self.visible {
            self.mounted = true;
            self.visible = true;
            return HotkeyAction::ShowAndFocus;
        }

        if has_focus {
            self.visible = false;
            return HotkeyAction::Hide;
        }

        HotkeyAction::FocusExisting
    }

    pub fn on_escape(&mut self) -> bool {
        if self.visible {
            self.visible = false;
            return true;
        }
        false
    }

    /// Removes the overlay from the page. Returns whether anything was mounted.
    pub fn teardown(&mut self) -> bool {
        let was_mounted = self.mounted;
        self.mounted = false;
        self.visible = false;
        was_mounted
    }
}

/// Page-side half of the control protocol: reacts to background signals and
/// to the page becoming visible again.
pub struct PageContext {
    bridge: Arc<MessageBridge>,
    overlay: Mutex<OverlayState>,
}

impl PageContext {
    pub fn new(bridge: Arc<MessageBridge>) -> Self {
        Self {
            bridge,
            overlay: Mutex::new(OverlayState::default()),
        }
    }

    pub fn bridge(&self) -> &MessageBridge {
        &self.bridge
    }

    pub fn overlay(&self) -> OverlayState {
        *self.lock_overlay()
    }

    pub fn on_hotkey(&self, has_focus: bool) -> HotkeyAction {
        self.lock_overlay().on_hotkey(has_focus)
    }

    pub fn on_escape(&self) -> bool {
        self.lock_overlay().on_escape()
    }

    pub fn handle_control(&self, signal: ControlSignal) -> ControlAck {
        match signal {
            ControlSignal::CleanupOldContext => {
                let removed = self.lock_overlay().teardown();
                self.bridge.mark_invalidated();
                info!(removed, "old page context cleaned up");
            }
            ControlSignal::ReinjectContext => {
                self.bridge.reset();
                info!("page context re-attached");
            }
        }
        ControlAck { success: true }
    }

    /// A page coming back into view while invalidated starts recovery on its
    /// own. Returns `None` when nothing needed doing.
    pub async fn on_visibility_change(&self, visible: bool) -> Option<Result<(), ChannelError>> {
        if !visible {
            return None;
        }
        let session = self.bridge.session();
        if session.channel_valid || session.is_terminal() {
            return None;
        }
        debug!(retry_count = session.retry_count, "page visible while invalidated");
        Some(self.bridge.recover().await)
    }

    fn lock_overlay(&self) -> MutexGuard<'_, OverlayState> {
        self.overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
