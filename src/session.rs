use std::path::Path;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderName, HeaderValue, REFERER};
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::parse::extract_shared_data;
use crate::request::{GetOptions, Transport};
use crate::{Error, Result};

const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "x-csrftoken";

/// Tokens obtained by priming the site once per run.
#[derive(Debug, Clone, Default)]
pub struct Session {
    gis_token: Option<String>,
    authenticated: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Fails unless [`Session::authenticate`] succeeded.
    pub fn require(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::NotAuthenticated)
        }
    }

    /// Fetches the site root, picks the CSRF token out of the cookie jar and installs
    /// it on the transport for every later request.
    pub async fn authenticate(&mut self, transport: &mut Transport, base_url: &str) -> bool {
        let root = format!("{base_url}/");
        let Some(res) = transport.get(&root, GetOptions::default()).await else {
            warn!("Couldn't reach {root}, not authenticated");
            return false;
        };

        let Some(csrf) = cookie_value(transport.jar(), base_url, CSRF_COOKIE) else {
            warn!("{root} didn't set a `{CSRF_COOKIE}` cookie, not authenticated");
            return false;
        };
        let gis = match extract_shared_data(&res.text()) {
            Ok(data) => data
                .get("rhx_gis")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            Err(e) => {
                debug!("No embedded data on {root}: {e}");
                None
            }
        };

        match HeaderValue::from_str(&csrf) {
            Ok(value) => {
                transport.set_default_header(HeaderName::from_static(CSRF_HEADER), value)
            }
            Err(e) => {
                warn!("Unusable csrf token: {e}");
                return false;
            }
        }
        if let Ok(referer) = HeaderValue::from_str(&root) {
            transport.set_default_header(REFERER, referer);
        }

        self.gis_token = gis.or(Some(csrf));
        self.authenticated = true;
        info!("Authenticated against {base_url}");
        true
    }

    /// Request signature for the query endpoint: `md5("<token>:<variables>")` as hex.
    pub fn signature(&self, variables: &str) -> Option<String> {
        let token = self.gis_token.as_deref()?;
        Some(format!("{:x}", md5::compute(format!("{token}:{variables}"))))
    }
}

/// Loads a credential blob written by [`save_blob`] into the jar. A missing or
/// unreadable blob only means starting without cookies.
pub async fn load_blob(path: &Path, jar: &Jar, base_url: &str) {
    let blob = match tokio::fs::read_to_string(path).await {
        Ok(blob) => blob,
        Err(e) => {
            info!("No stored session at {}: {e}", path.display());
            return;
        }
    };
    let Ok(url) = Url::parse(base_url) else {
        warn!("Invalid base url {base_url}, ignoring stored session");
        return;
    };
    let mut count = 0;
    for cookie in blob.split(';').map(str::trim).filter(|c| c.contains('=')) {
        jar.add_cookie_str(cookie, &url);
        count += 1;
    }
    info!("Loaded {count} cookies from {}", path.display());
}

/// Writes the jar's cookies for `base_url` to `path`.
pub async fn save_blob(path: &Path, jar: &Jar, base_url: &str) -> Result<()> {
    let url = Url::parse(base_url).map_err(|e| {
        Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;
    let Some(cookies) = jar.cookies(&url) else {
        debug!("No cookies to persist");
        return Ok(());
    };
    let blob = cookies
        .to_str()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, blob).await?;
    Ok(())
}

fn cookie_value(jar: &Jar, base_url: &str, name: &str) -> Option<String> {
    let url = Url::parse(base_url).ok()?;
    let header = jar.cookies(&url)?;
    header.to_str().ok()?.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
