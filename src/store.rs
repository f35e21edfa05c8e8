//! Credential store: upstream tokens, locally minted API keys and `config.json`.
//!
//! The store is the only writer of the three JSON files.  Loading never fails:
//! a missing, unreadable or mis-shaped file becomes an empty collection (or the
//! default settings) and a warning is logged.  Every save goes through a
//! temporary file and a rename so a concurrent reader observes either the old
//! or the new contents.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{DataPaths, Settings, normalize_endpoint};
use crate::error::{Error, Result};
use crate::utils::time::now_rfc3339;

/// Literal prefix of every generated API key.
pub const API_KEY_PREFIX: &str = "sk-";

/// Number of random characters after [`API_KEY_PREFIX`].
pub const API_KEY_RANDOM_LEN: usize = 48;

/// Sentinel `token_name` meaning "whichever token is available".
pub const AUTO_TOKEN: &str = "auto";

/// Generates a fresh API key secret: `sk-` followed by 48 alphanumerics drawn
/// from the operating system CSPRNG.
pub fn generate_api_key_secret() -> String {
    let random: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(API_KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{API_KEY_PREFIX}{random}")
}

////////////////////////////////////////////// TokenSet /////////////////////////////////////////////

/// A named upstream credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// Unique name chosen by the user.
    pub name: String,
    /// Opaque bearer string.
    pub value: String,
}

/// Tokens in file order.  "First available" means the first entry here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenSet {
    entries: Vec<Token>,
}

impl TokenSet {
    /// Parses `tokens.json`: an object whose values are all strings.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(map) = value else {
            return Err(Error::serialization("tokens file is not a JSON object", None));
        };
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in map {
            let Value::String(value) = value else {
                return Err(Error::serialization(
                    format!("token {name:?} is not a string"),
                    None,
                ));
            };
            entries.push(Token { name, value });
        }
        Ok(Self { entries })
    }

    /// The JSON object written to `tokens.json` and sent on sync.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|t| (t.name.clone(), Value::String(t.value.clone())))
            .collect()
    }

    /// Looks up a token value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    /// True if a token with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The first token in file order.
    pub fn first(&self) -> Option<&Token> {
        self.entries.first()
    }

    /// Resolves the `token_name` of an API key to a token value.
    ///
    /// An existing name wins; `"auto"` falls back to the first token; anything
    /// else resolves to nothing.
    pub fn resolve(&self, token_name: &str) -> Option<&str> {
        if let Some(value) = self.get(token_name) {
            return Some(value);
        }
        if token_name == AUTO_TOKEN {
            return self.first().map(|t| t.value.as_str());
        }
        None
    }

    /// Inserts or replaces a token.  A replaced token keeps its position.
    pub fn upsert(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|t| t.name == name) {
            Some(token) => token.value = value.to_string(),
            None => self.entries.push(Token {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Removes a token, returning whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|t| t.name != name);
        self.entries.len() != before
    }

    /// Iterates tokens in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.entries.iter()
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no tokens.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

///////////////////////////////////////////// ApiKeySet /////////////////////////////////////////////

/// One entry of `apikeys.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// The generated secret handed to external callers.
    pub key: String,
    /// Creation timestamp.
    #[serde(default)]
    pub created: String,
    /// Name of the linked token, or `"auto"`.
    #[serde(default = "auto_token_name")]
    pub token_name: String,
}

fn auto_token_name() -> String {
    AUTO_TOKEN.to_string()
}

/// API keys in file order, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiKeySet {
    entries: Vec<(String, ApiKeyRecord)>,
}

impl ApiKeySet {
    /// Parses `apikeys.json`: an object whose values are all API key records.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(map) = value else {
            return Err(Error::serialization("API key file is not a JSON object", None));
        };
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in map {
            let record: ApiKeyRecord = serde_json::from_value(value).map_err(|err| {
                Error::serialization(
                    format!("API key {name:?} is malformed: {err}"),
                    Some(Box::new(err)),
                )
            })?;
            entries.push((name, record));
        }
        Ok(Self { entries })
    }

    /// The JSON object written to `apikeys.json` and sent on sync.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, record)| {
                let value = serde_json::to_value(record).unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect()
    }

    /// Looks up a record by key name.
    pub fn get(&self, name: &str) -> Option<&ApiKeyRecord> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, record)| record)
    }

    /// True if a key with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Finds the entry whose secret equals `key`.
    pub fn find_by_key(&self, key: &str) -> Option<(&str, &ApiKeyRecord)> {
        self.entries
            .iter()
            .find(|(_, record)| record.key == key)
            .map(|(name, record)| (name.as_str(), record))
    }

    /// Inserts or replaces a record.  A replaced record keeps its position.
    pub fn upsert(&mut self, name: &str, record: ApiKeyRecord) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = record,
            None => self.entries.push((name.to_string(), record)),
        }
    }

    /// Removes a record, returning whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        self.entries.len() != before
    }

    /// Iterates `(name, record)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ApiKeyRecord)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/////////////////////////////////////////////// Sync ////////////////////////////////////////////////

/// A whole-collection snapshot handed to the sync hook after a mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// The token collection changed.
    Tokens(Map<String, Value>),
    /// The API key collection changed.
    ApiKeys(Map<String, Value>),
}

/// Receives mutation notifications.  Implementations must not block and must
/// not report failure back to the store.
pub trait SyncHook: Send + Sync {
    /// Called after a successful save with the endpoint in effect at the time.
    fn notify(&self, endpoint: &str, event: SyncEvent);
}

/////////////////////////////////////////// Confirmation ////////////////////////////////////////////

/// Proof that the user explicitly agreed to a destructive operation.
#[derive(Debug)]
pub struct Confirmed(());

impl Confirmed {
    /// Accepts `y` or `yes` (any case); everything else is a refusal.
    pub fn from_answer(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Confirmed(())),
            _ => None,
        }
    }
}

////////////////////////////////////////// CredentialStore //////////////////////////////////////////

/// Owner of tokens, API keys and settings.
pub struct CredentialStore {
    paths: DataPaths,
    settings: Settings,
    tokens: TokenSet,
    apikeys: ApiKeySet,
    sync: Option<Arc<dyn SyncHook>>,
}

impl CredentialStore {
    /// Loads everything under `paths`, substituting defaults for anything
    /// missing or unreadable.
    pub fn open(paths: DataPaths) -> Self {
        let settings = load_or_default(&paths.config_file(), Settings::from_json);
        let tokens = load_or_default(&paths.tokens_file(), TokenSet::from_json);
        let apikeys = load_or_default(&paths.apikeys_file(), ApiKeySet::from_json);
        tracing::debug!(
            root = %paths.root().display(),
            tokens = tokens.len(),
            apikeys = apikeys.len(),
            "opened credential store"
        );
        Self {
            paths,
            settings,
            tokens,
            apikeys,
            sync: None,
        }
    }

    /// Attaches a hook notified after every token or API key mutation.
    pub fn with_sync_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.sync = Some(hook);
        self
    }

    /// The file layout in use.
    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// The current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// All tokens.
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    /// All API keys.
    pub fn apikeys(&self) -> &ApiKeySet {
        &self.apikeys
    }

    /// True if a token with this name exists.
    pub fn has_token(&self, name: &str) -> bool {
        self.tokens.contains(name)
    }

    /// True if an API key with this name exists.
    pub fn has_apikey(&self, name: &str) -> bool {
        self.apikeys.contains(name)
    }

    /// Adds or replaces a token, logs its raw value and notifies sync.
    pub fn add_token(&mut self, name: &str, value: &str) -> Result<()> {
        self.insert_token(name, value)?;
        self.append_token_log(value);
        self.sync_tokens_to_server();
        Ok(())
    }

    /// Removes a token, returning whether it existed.
    ///
    /// Removing the active token leaves `active_token` pointing at a name that
    /// no longer exists; [`CredentialStore::get_active_token`] then falls back.
    pub fn remove_token(&mut self, name: &str) -> Result<bool> {
        let mut tokens = self.tokens.clone();
        if !tokens.remove(name) {
            return Ok(false);
        }
        self.save_tokens(&tokens)?;
        self.tokens = tokens;
        self.sync_tokens_to_server();
        Ok(true)
    }

    /// Makes `name` the active token if it exists.
    pub fn use_token(&mut self, name: &str) -> Result<bool> {
        if !self.tokens.contains(name) {
            return Ok(false);
        }
        let mut settings = self.settings.clone();
        settings.active_token = Some(name.to_string());
        self.save_settings(&settings)?;
        self.settings = settings;
        Ok(true)
    }

    /// The name of the token outgoing requests use, after fallback.
    pub fn active_token_name(&self) -> Option<&str> {
        if let Some(active) = self.settings.active_token.as_deref()
            && self.tokens.contains(active)
        {
            return Some(active);
        }
        self.tokens.first().map(|t| t.name.as_str())
    }

    /// The value of the token outgoing requests use: the active token if it
    /// still exists, else the first token, else `None`.
    pub fn get_active_token(&self) -> Option<&str> {
        self.active_token_name().and_then(|name| self.tokens.get(name))
    }

    /// Mints a new API key linked to the token requests currently use, after
    /// fallback, or to `"auto"` when there is none.
    pub fn generate_api_key(&mut self, name: &str) -> Result<String> {
        let key = generate_api_key_secret();
        let token_name = self.active_token_name().unwrap_or(AUTO_TOKEN).to_string();
        let record = ApiKeyRecord {
            key: key.clone(),
            created: now_rfc3339(),
            token_name,
        };
        let mut apikeys = self.apikeys.clone();
        apikeys.upsert(name, record);
        self.save_apikeys(&apikeys)?;
        self.apikeys = apikeys;
        tracing::info!(key_name = name, "generated API key");
        self.sync_apikeys_to_server();
        Ok(key)
    }

    /// Removes an API key, returning whether it existed.
    pub fn remove_apikey(&mut self, name: &str) -> Result<bool> {
        let mut apikeys = self.apikeys.clone();
        if !apikeys.remove(name) {
            return Ok(false);
        }
        self.save_apikeys(&apikeys)?;
        self.apikeys = apikeys;
        self.sync_apikeys_to_server();
        Ok(true)
    }

    /// Persists a new gateway endpoint.
    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.api_endpoint = normalize_endpoint(endpoint);
        self.save_settings(&settings)?;
        self.settings = settings;
        Ok(())
    }

    /// Wipes tokens, API keys, the active token and the token log.
    pub fn reset(&mut self, _confirmed: Confirmed) -> Result<()> {
        let tokens = TokenSet::default();
        let apikeys = ApiKeySet::default();
        let mut settings = self.settings.clone();
        settings.active_token = None;
        self.save_tokens(&tokens)?;
        self.save_apikeys(&apikeys)?;
        self.save_settings(&settings)?;
        self.tokens = tokens;
        self.apikeys = apikeys;
        self.settings = settings;
        let log = self.paths.token_log();
        if log.exists()
            && let Err(err) = fs::write(&log, b"")
        {
            tracing::warn!(path = %log.display(), error = %err, "could not truncate token log");
        }
        tracing::info!("credential store reset");
        self.sync_tokens_to_server();
        self.sync_apikeys_to_server();
        Ok(())
    }

    /// Imports a project-level `tokens.json` when the store holds no tokens.
    ///
    /// The first imported token becomes active.  Returns the number imported.
    pub fn import_seed_tokens(&mut self, path: &Path) -> Result<usize> {
        if !self.tokens.is_empty() || !path.exists() {
            return Ok(0);
        }
        let seed = match fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|json| TokenSet::from_json(&json))
        {
            Ok(seed) => seed,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not load seed tokens");
                return Ok(0);
            }
        };
        let Some(first) = seed.first().map(|t| t.name.clone()) else {
            return Ok(0);
        };
        let mut tokens = self.tokens.clone();
        for token in seed.iter() {
            tokens.upsert(&token.name, &token.value);
        }
        self.save_tokens(&tokens)?;
        self.tokens = tokens;
        for token in seed.iter() {
            self.append_token_log(&token.value);
        }
        self.use_token(&first)?;
        self.sync_tokens_to_server();
        Ok(seed.len())
    }

    /// Imports the last line of `data/token.txt` as token `"auto"` when the
    /// store holds no tokens.
    pub fn import_token_log(&mut self) -> Result<bool> {
        if !self.tokens.is_empty() {
            return Ok(false);
        }
        let log = self.paths.token_log();
        let contents = match fs::read_to_string(&log) {
            Ok(contents) => contents,
            Err(_) => return Ok(false),
        };
        let Some(last) = contents.lines().map(str::trim).rfind(|l| !l.is_empty()) else {
            return Ok(false);
        };
        let last = last.to_string();
        self.insert_token(AUTO_TOKEN, &last)?;
        self.use_token(AUTO_TOKEN)?;
        self.sync_tokens_to_server();
        Ok(true)
    }

    /// Hands the whole token set to the sync hook.
    pub fn sync_tokens_to_server(&self) {
        if let Some(hook) = &self.sync {
            hook.notify(
                &self.settings.api_endpoint,
                SyncEvent::Tokens(self.tokens.to_json_map()),
            );
        }
    }

    /// Hands the whole API key set to the sync hook.
    pub fn sync_apikeys_to_server(&self) {
        if let Some(hook) = &self.sync {
            hook.notify(
                &self.settings.api_endpoint,
                SyncEvent::ApiKeys(self.apikeys.to_json_map()),
            );
        }
    }

    fn insert_token(&mut self, name: &str, value: &str) -> Result<()> {
        let mut tokens = self.tokens.clone();
        tokens.upsert(name, value);
        self.save_tokens(&tokens)?;
        self.tokens = tokens;
        tracing::info!(token_name = name, "stored token");
        Ok(())
    }

    fn append_token_log(&self, value: &str) {
        let log = self.paths.token_log();
        let result = ensure_parent(&log).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&log)?;
            writeln!(file, "{value}")?;
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!(path = %log.display(), error = %err, "could not append to token log");
        }
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        write_json(&self.paths.config_file(), settings)
    }

    fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
        write_json(&self.paths.tokens_file(), &tokens.to_json_map())
    }

    fn save_apikeys(&self, apikeys: &ApiKeySet) -> Result<()> {
        write_json(&self.paths.apikeys_file(), &apikeys.to_json_map())
    }
}

fn load_or_default<T: Default>(path: &Path, parse: impl FnOnce(&str) -> Result<T>) -> T {
    if !path.exists() {
        return T::default();
    }
    match fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|json| parse(&json))
    {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "discarding unreadable file");
            T::default()
        }
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    ensure_parent(path).map_err(|err| Error::io("failed to create data directory", err))?;
    let tmp = tmp_path(path);
    fs::write(&tmp, &json).map_err(|err| Error::io(format!("failed to write {}", tmp.display()), err))?;
    fs::rename(&tmp, path)
        .map_err(|err| Error::io(format!("failed to replace {}", path.display()), err))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
