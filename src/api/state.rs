use std::sync::Arc;

use crate::platform::Platform;

#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<Platform>,
}

impl AppState {
    pub fn new(platform: Arc<Platform>) -> Self {
        AppState { platform }
    }
}
