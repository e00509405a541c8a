use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line off stdin. `params` defaults to JSON null so methods
/// without arguments can omit it.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// At most one workspace is open at a time; handlers that touch storage
/// refuse to run until `workspace.select` has populated `db`.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
