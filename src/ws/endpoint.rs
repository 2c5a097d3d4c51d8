//! Connect URL resolution.
//!
//! The URL is resolved again before every connection attempt, so an endpoint is a recipe
//! rather than a fixed address.

use url::Url;
use uuid::Uuid;

use crate::Result;
use crate::error::Error;

const DASHBOARD_PATH: &str = "/ws/dashboard";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// `<base><path>`, falling back to `<origin><path>` when `base` is empty
    Path {
        base: String,
        origin: Option<String>,
        path: String,
    },
    /// `<base>/ws/dashboard/<client_id>`
    Dashboard { base: String, client_id: Uuid },
}

/// Where the realtime socket lives.
///
/// # Example
///
/// ```
/// use dashboard_realtime::Endpoint;
///
/// let endpoint = Endpoint::new("https://dash.example.com", "/api/v1/ws");
/// assert_eq!(endpoint.resolve().unwrap().as_str(), "wss://dash.example.com/api/v1/ws");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    target: Target,
}

impl Endpoint {
    /// Explicit base URL plus path. `http`/`https` bases are upgraded to `ws`/`wss`.
    pub fn new<B: Into<String>, P: Into<String>>(base: B, path: P) -> Self {
        Self {
            target: Target::Path {
                base: base.into(),
                origin: None,
                path: path.into(),
            },
        }
    }

    /// Same-origin endpoint: the socket is served by the host that served the page.
    pub fn relative<O: Into<String>, P: Into<String>>(origin: O, path: P) -> Self {
        Self::new(String::new(), path).with_origin(origin)
    }

    /// Dashboard socket with a freshly generated client identifier.
    pub fn dashboard<B: Into<String>>(base: B) -> Self {
        Self::dashboard_with_id(base, Uuid::new_v4())
    }

    /// Dashboard socket with a caller-chosen client identifier.
    pub fn dashboard_with_id<B: Into<String>>(base: B, client_id: Uuid) -> Self {
        Self {
            target: Target::Dashboard {
                base: base.into(),
                client_id,
            },
        }
    }

    /// Origin used when the explicit base is empty.
    #[must_use]
    pub fn with_origin<O: Into<String>>(mut self, origin: O) -> Self {
        if let Target::Path { origin: slot, .. } = &mut self.target {
            *slot = Some(origin.into());
        }
        self
    }

    /// Client identifier embedded in dashboard URLs.
    #[must_use]
    pub fn client_id(&self) -> Option<Uuid> {
        match &self.target {
            Target::Dashboard { client_id, .. } => Some(*client_id),
            Target::Path { .. } => None,
        }
    }

    /// Build the WebSocket URL for the next connection attempt.
    pub fn resolve(&self) -> Result<Url> {
        match &self.target {
            Target::Path { base, origin, path } => {
                let base = base.trim();
                if !base.is_empty() {
                    return upgrade(&join(base, path));
                }

                let Some(origin) = origin.as_deref().map(str::trim).filter(|o| !o.is_empty())
                else {
                    return Err(Error::validation(
                        "endpoint has neither a base URL nor a page origin",
                    ));
                };

                let url = Url::parse(origin)?.join(&leading_slash(path))?;
                upgrade(url.as_str())
            }
            Target::Dashboard { base, client_id } => {
                let base = base.trim();
                if base.is_empty() {
                    return Err(Error::validation("dashboard endpoint requires a base URL"));
                }
                upgrade(&join(base, &format!("{DASHBOARD_PATH}/{client_id}")))
            }
        }
    }

    /// HTTP URL on the same host as the socket, used for health probes.
    pub fn http_url(&self, path: &str) -> Result<Url> {
        let mut url = self.resolve()?;
        let scheme = if url.scheme() == "wss" { "https" } else { "http" };
        url.set_scheme(scheme)
            .map_err(|()| Error::validation(format!("cannot derive {scheme} URL from {url}")))?;
        url.set_path(&leading_slash(path));
        url.set_query(None);
        Ok(url)
    }
}

fn leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

fn join(base: &str, path: &str) -> String {
    let path = leading_slash(path);
    if path == "/" {
        return base.to_owned();
    }
    format!("{}{path}", base.trim_end_matches('/'))
}

fn upgrade(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::validation(format!(
                "unsupported endpoint scheme `{other}`"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::validation(format!("cannot use {scheme} for {raw}")))?;
    Ok(url)
}
