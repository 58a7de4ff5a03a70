//! Shared application state.

use std::time::Instant;

use calsync_core::{Engine, Publisher, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub engine: Engine,
    pub publisher: Publisher,
    pub start_time: Instant,
}
