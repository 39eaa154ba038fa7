//! Shared application state.

use std::sync::Arc;

use padl_core::Launcher;

pub struct AppState {
    pub launcher: Arc<Launcher>,
}

impl AppState {
    pub fn new(launcher: Arc<Launcher>) -> Arc<Self> {
        Arc::new(Self { launcher })
    }
}
