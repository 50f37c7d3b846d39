/*!
    Durable client state: saved connectors and the login session.

    Both are plain JSON blobs under stable file names in the data directory.
    Last write wins; there is no versioning or migration.
*/

use crate::error::{AppError, AppResult};
use crate::http::SpecSource;
use crate::spec::NormalizedSpec;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CONNECTORS_KEY: &str = "autoadmin-connectors.json";
pub const SESSION_KEY: &str = "autoadmin-session.json";

/// How a connector obtains its spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorMode {
    /// Spec text stored with the connector.
    Local,
    /// Spec downloaded from `spec_url`.
    Remote,
    /// Spec at `base_url` + `swagger_path`.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub id: String,
    pub name: String,
    pub mode: ConnectorMode,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swagger_path: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Connector {
    pub fn new(name: &str, mode: ConnectorMode, base_url: &str) -> Self {
        Connector {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mode,
            base_url: base_url.trim_end_matches('/').to_string(),
            spec_payload: None,
            spec_url: None,
            swagger_path: None,
            created_at: Utc::now(),
            last_synced_at: None,
        }
    }

    /// Where to read the spec from for this connector.
    ///
    /// `refresh` bypasses a stored payload for remote/direct connectors.
    pub fn spec_source(&self, refresh: bool) -> AppResult<SpecSource> {
        if let (false, Some(payload)) = (refresh, &self.spec_payload) {
            return Ok(SpecSource::Text(payload.clone()));
        }
        match self.mode {
            ConnectorMode::Local => self
                .spec_payload
                .clone()
                .map(SpecSource::Text)
                .ok_or_else(|| AppError::Connector(format!("Connector '{}' has no stored spec", self.name))),
            ConnectorMode::Remote => self
                .spec_url
                .clone()
                .map(SpecSource::Url)
                .ok_or_else(|| AppError::Connector(format!("Connector '{}' has no spec URL", self.name))),
            ConnectorMode::Direct => Ok(SpecSource::convention(&self.base_url, self.swagger_path.as_deref())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectorState {
    #[serde(default)]
    connectors: Vec<Connector>,
    #[serde(default)]
    active_id: Option<String>,
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> AppResult<T> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(T::default()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(AppError::Io(e)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Saved connectors plus the single active one.
pub struct ConnectorStore {
    path: PathBuf,
    state: ConnectorState,
}

impl ConnectorStore {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let path = data_dir.join(CONNECTORS_KEY);
        let state = read_json(&path)?;
        Ok(ConnectorStore { path, state })
    }

    fn save(&self) -> AppResult<()> {
        write_json(&self.path, &self.state)
    }

    pub fn list(&self) -> &[Connector] {
        &self.state.connectors
    }

    /// Look up by id or, failing that, by name.
    pub fn get(&self, key: &str) -> Option<&Connector> {
        self.state
            .connectors
            .iter()
            .find(|c| c.id == key)
            .or_else(|| self.state.connectors.iter().find(|c| c.name == key))
    }

    fn get_mut(&mut self, key: &str) -> AppResult<&mut Connector> {
        let index = self
            .get(key)
            .map(|c| c.id.clone())
            .and_then(|id| self.state.connectors.iter().position(|c| c.id == id))
            .ok_or_else(|| AppError::Connector(format!("No connector named '{}'", key)))?;
        Ok(&mut self.state.connectors[index])
    }

    pub fn active(&self) -> Option<&Connector> {
        self.state.active_id.as_deref().and_then(|id| self.get(id))
    }

    /// Add a connector. The first connector added becomes active.
    pub fn add(&mut self, connector: Connector) -> AppResult<&Connector> {
        if self.get(&connector.name).is_some() {
            return Err(AppError::Connector(format!("Connector '{}' already exists", connector.name)));
        }
        info!("Saving connector '{}' ({:?})", connector.name, connector.mode);
        if self.state.active_id.is_none() {
            self.state.active_id = Some(connector.id.clone());
        }
        self.state.connectors.push(connector);
        self.save()?;
        Ok(&self.state.connectors[self.state.connectors.len() - 1])
    }

    pub fn set_active(&mut self, key: &str) -> AppResult<()> {
        let id = self.get_mut(key)?.id.clone();
        self.state.active_id = Some(id);
        self.save()
    }

    pub fn rename(&mut self, key: &str, name: &str) -> AppResult<()> {
        if self.get(name).is_some() {
            return Err(AppError::Connector(format!("Connector '{}' already exists", name)));
        }
        self.get_mut(key)?.name = name.to_string();
        self.save()
    }

    /// Store a freshly synced spec for the connector.
    pub fn record_sync(&mut self, key: &str, payload: &str) -> AppResult<()> {
        let connector = self.get_mut(key)?;
        connector.spec_payload = Some(payload.to_string());
        connector.last_synced_at = Some(Utc::now());
        self.save()
    }

    pub fn remove(&mut self, key: &str) -> AppResult<Connector> {
        let id = self.get_mut(key)?.id.clone();
        let index = self
            .state
            .connectors
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| AppError::Connector(format!("No connector named '{}'", key)))?;
        let removed = self.state.connectors.remove(index);
        if self.state.active_id.as_deref() == Some(removed.id.as_str()) {
            self.state.active_id = None;
        }
        self.save()?;
        Ok(removed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    /// Token to send: an explicit one (flag or env) wins over the saved session.
    pub fn bearer<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit
            .filter(|t| !t.trim().is_empty())
            .or(self.token.as_deref())
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Self {
        SessionStore {
            path: data_dir.join(SESSION_KEY),
        }
    }

    pub fn load(&self) -> AppResult<Session> {
        read_json(&self.path)
    }

    pub fn login(&self, token: &str, user: Option<&str>) -> AppResult<Session> {
        let session = Session {
            token: Some(token.to_string()),
            user: user.map(str::to_string),
            status: SessionStatus::Authenticated,
        };
        write_json(&self.path, &session)?;
        Ok(session)
    }

    pub fn logout(&self) -> AppResult<()> {
        write_json(&self.path, &Session::default())
    }
}

/// One line per endpoint: `METHOD path  summary`.
pub fn endpoint_listing(spec: &NormalizedSpec) -> String {
    spec.endpoints
        .iter()
        .map(|e| format!("{:<7} {}  {}\n", e.method.as_str(), e.path, e.summary))
        .collect()
}

/// Unified diff between two endpoint listings, `None` when nothing changed.
pub fn listing_diff(before: &str, after: &str) -> Option<String> {
    let diff = TextDiff::from_lines(before, after);
    if diff.iter_all_changes().all(|change| change.tag() == ChangeTag::Equal) {
        return None;
    }
    Some(diff.unified_diff().context_radius(1).header("stored", "remote").to_string())
}
