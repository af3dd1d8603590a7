use std::collections::HashSet;
use std::sync::Arc;

use piggies_core::PiggiesError;
use piggies_core::collaborators::ContentChecker;
use piggies_db::Database;
use piggies_gateway::dispatcher::Dispatcher;

use crate::error::ApiResult;
use crate::geocode::Geocoder;
use crate::media::LocalMediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub media: LocalMediaStore,
    pub checker: Box<dyn ContentChecker>,
    /// Absent when no geocoder is configured; venues then need coordinates.
    pub geocoder: Option<Geocoder>,
    /// Identity-provider subjects promoted to admin when they open a session.
    pub bootstrap_admins: HashSet<String>,
}

/// Runs blocking DB work off the async runtime.
pub async fn with_db<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> Result<T, PiggiesError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let value = tokio::task::spawn_blocking(move || f(&state.db)).await??;
    Ok(value)
}
