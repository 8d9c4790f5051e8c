//! Interactive consent: authorization URL, user agent, loopback redirect receiver
//!
//! The user approves access in a browser; the provider then redirects to a
//! listener on 127.0.0.1 carrying either `code` or `error` plus the `state`
//! we generated.

use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, Scope, TokenUrl,
};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};
use url::Url;

use crate::client_config::ClientConfig;
use crate::error::{AuthError, Result};
use crate::scopes::ScopeSet;

/// How often the receiver thread checks whether it is still wanted
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const SUCCESS_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>gmail-cli</title></head>\
<body><h1>Authorization complete</h1><p>You can close this tab and return to the terminal.</p></body></html>";

const DENIED_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>gmail-cli</title></head>\
<body><h1>Authorization denied</h1><p>No access was granted. Run <code>gmail init</code> to try again.</p></body></html>";

const INVALID_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>gmail-cli</title></head>\
<body><h1>Invalid request</h1><p>This response does not belong to the current login attempt.</p></body></html>";

/// A consent request: the URL to visit plus the secrets needed to finish it
pub struct AuthorizationRequest {
    pub url: Url,
    /// CSRF `state` the redirect must echo back
    pub state: CsrfToken,
    /// PKCE verifier sent with the code exchange
    pub pkce_verifier: PkceCodeVerifier,
}

/// Build the provider URL the user must visit to grant consent
///
/// `access_type=offline` and `prompt=consent` make the provider issue a
/// refresh token even when the user approved this client before. The
/// request carries a random `state` and an S256 PKCE challenge.
pub fn authorization_request(
    client: &ClientConfig,
    scopes: &ScopeSet,
    redirect_uri: &str,
) -> Result<AuthorizationRequest> {
    let invalid = |field: &str, e: url::ParseError| {
        AuthError::InvalidClientConfig(format!("Invalid {}: {}", field, e))
    };

    let oauth = BasicClient::new(
        ClientId::new(client.client_id.clone()),
        Some(ClientSecret::new(client.client_secret.clone())),
        AuthUrl::new(client.auth_uri.clone()).map_err(|e| invalid("auth_uri", e))?,
        Some(TokenUrl::new(client.token_uri.clone()).map_err(|e| invalid("token_uri", e))?),
    )
    .set_redirect_uri(
        RedirectUrl::new(redirect_uri.to_string()).map_err(|e| invalid("redirect_uri", e))?,
    );

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, state) = oauth
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().map(|s| Scope::new(s.to_string())))
        .set_pkce_challenge(pkce_challenge)
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();

    Ok(AuthorizationRequest {
        url,
        state,
        pkce_verifier,
    })
}

/// Something that shows the authorization URL to the user
pub trait UserAgent: Send + Sync {
    fn present(&self, url: &Url) -> Result<()>;
}

/// Prints the URL and, unless disabled, opens the system browser
#[derive(Debug, Clone)]
pub struct SystemBrowser {
    pub open_browser: bool,
}

impl Default for SystemBrowser {
    fn default() -> Self {
        Self { open_browser: true }
    }
}

impl UserAgent for SystemBrowser {
    fn present(&self, url: &Url) -> Result<()> {
        eprintln!("Open this URL in your browser to authorize access:\n\n  {}\n", url);
        if self.open_browser {
            if let Err(e) = webbrowser::open(url.as_str()) {
                warn!("Could not open a browser automatically: {}", e);
            }
        }
        Ok(())
    }
}

/// Local HTTP listener receiving the provider's redirect
pub struct LoopbackReceiver {
    server: Arc<Server>,
    redirect_uri: String,
}

impl LoopbackReceiver {
    /// Bind on 127.0.0.1; port 0 lets the OS choose
    pub fn bind(port: u16) -> Result<Self> {
        let server = Server::http(("127.0.0.1", port)).map_err(|e| {
            AuthError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("Cannot listen on 127.0.0.1:{} for the OAuth redirect: {}", port, e),
            ))
        })?;
        let addr = server.server_addr().to_ip().ok_or_else(|| {
            AuthError::Io(io::Error::new(
                io::ErrorKind::Other,
                "Redirect listener has no IP address",
            ))
        })?;
        let redirect_uri = format!("http://127.0.0.1:{}/", addr.port());
        debug!("Loopback receiver listening on {}", redirect_uri);
        Ok(Self {
            server: Arc::new(server),
            redirect_uri,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait until a redirect with the expected `state` arrives.
    ///
    /// Requests with a foreign `state` or without OAuth parameters are
    /// answered and ignored. Runs until a result arrives; the caller bounds it,
    /// and dropping the future stops the listener thread.
    pub async fn wait_for_code(&self, expected_state: &str) -> Result<String> {
        let server = Arc::clone(&self.server);
        let expected_state = expected_state.to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let _stop_on_drop = StopOnDrop(Arc::clone(&stop));

        tokio::task::spawn_blocking(move || serve_until_redirect(&server, &expected_state, &stop))
            .await
            .map_err(|e| AuthError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn serve_until_redirect(server: &Server, expected_state: &str, stop: &AtomicBool) -> Result<String> {
    while !stop.load(Ordering::Relaxed) {
        let request = match server.recv_timeout(POLL_INTERVAL)? {
            Some(request) => request,
            None => continue,
        };
        let path = request.url().split('?').next().unwrap_or_default();
        debug!("Redirect request: {} {}", request.method(), path);

        if *request.method() != Method::Get {
            respond(request, 405, INVALID_HTML);
            continue;
        }

        match classify_redirect(request.url(), expected_state) {
            Redirect::Code(code) => {
                respond(request, 200, SUCCESS_HTML);
                info!("Received authorization code");
                return Ok(code);
            }
            Redirect::Denied(reason) => {
                respond(request, 200, DENIED_HTML);
                return Err(AuthError::UserDenied(reason));
            }
            Redirect::StateMismatch => {
                warn!("Ignoring redirect with mismatched state parameter");
                respond(request, 400, INVALID_HTML);
            }
            Redirect::Unrelated => respond(request, 404, INVALID_HTML),
        }
    }
    Err(AuthError::Cancelled(
        "Stopped waiting for the browser redirect".to_string(),
    ))
}

#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code(String),
    Denied(String),
    StateMismatch,
    Unrelated,
}

fn classify_redirect(target: &str, expected_state: &str) -> Redirect {
    let url = match Url::parse("http://127.0.0.1").and_then(|base| base.join(target)) {
        Ok(url) => url,
        Err(_) => return Redirect::Unrelated,
    };
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if !params.contains_key("code") && !params.contains_key("error") {
        return Redirect::Unrelated;
    }
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Redirect::StateMismatch;
    }
    if let Some(error) = params.get("error") {
        let reason = match params.get("error_description") {
            Some(description) => format!("{}: {}", error, description),
            None => error.clone(),
        };
        return Redirect::Denied(reason);
    }
    match params.get("code") {
        Some(code) if !code.is_empty() => Redirect::Code(code.clone()),
        _ => Redirect::Unrelated,
    }
}

fn respond(request: Request, status: u16, body: &str) {
    let mut response = Response::from_string(body).with_status_code(status);
    if let Ok(header) = Header::from_bytes(b"Content-Type", b"text/html; charset=utf-8") {
        response.add_header(header);
    }
    if let Err(e) = request.respond(response) {
        debug!("Failed to answer redirect request: {}", e);
    }
}
