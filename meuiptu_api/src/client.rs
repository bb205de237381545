//! HTTP client for the "Meu IPTU" portal of Tubarão/SC.

use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use url::Url;

use crate::{
    query::DebtQueryForm, types::TaxpayerId, user_agent::get_user_agent, FetchError, Stage,
};

/// Production endpoint of the portal's debt search.
pub const PORTAL_URL: &str =
    "https://tubarao-sc.prefeituramoderna.com.br/meuiptu/index.php?cidade=tubarao";

/// Timeout applied to each of the two requests independently.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ENDPOINT_PATH: &str = "/meuiptu/index.php";
const CITY: &str = "tubarao";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7";

/// HTTP client for the portal's debt search.
///
/// Holds one `reqwest::Client` with a cookie store for its whole lifetime, so
/// the session cookie set by the priming GET travels with the POST and with
/// later refreshes. Each tracked taxpayer owns its own `Client`.
pub struct Client {
    endpoint: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl Client {
    /// Creates a client pointing at the production portal.
    pub fn new() -> Result<Self, FetchError> {
        let endpoint = Url::parse(PORTAL_URL).map_err(|e| {
            tracing::error!("Invalid portal URL: {}", e);
            FetchError::Setup(e.to_string())
        })?;
        Self::with_endpoint(endpoint)
    }

    /// Creates a client against another host (scheme and authority only; the
    /// portal path and city are appended). Used for testing with wiremock.
    pub fn with_base_url(base_url: &str) -> Result<Self, FetchError> {
        let mut endpoint = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            tracing::error!("Invalid base URL {}: {}", base_url, e);
            FetchError::Setup(e.to_string())
        })?;
        endpoint.set_path(ENDPOINT_PATH);
        endpoint.set_query(None);
        endpoint.query_pairs_mut().append_pair("cidade", CITY);
        Self::with_endpoint(endpoint)
    }

    fn with_endpoint(endpoint: Url) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .cookie_store(true)
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                FetchError::Setup(e.to_string())
            })?;
        Ok(Self {
            endpoint,
            http,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the two-step exchange for `taxpayer` and returns the HTML body of
    /// the search result page.
    pub async fn fetch(&self, taxpayer: &TaxpayerId) -> Result<String, FetchError> {
        self.prime().await?;
        self.submit(&DebtQueryForm::by_document(taxpayer)).await
    }

    /// GET the search page so the portal can set its session cookies.
    async fn prime(&self) -> Result<(), FetchError> {
        let resp = self
            .http
            .get(self.endpoint.clone())
            .timeout(self.timeout)
            .header("accept", ACCEPT_HTML)
            .header("accept-language", ACCEPT_LANGUAGE)
            .send()
            .await
            .map_err(|e| self.classify(Stage::Prime, e))?;
        check_status(Stage::Prime, resp).await?;
        Ok(())
    }

    /// POST the search form and read the result page.
    pub async fn submit(&self, form: &DebtQueryForm) -> Result<String, FetchError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .header("accept", ACCEPT_HTML)
            .header("accept-language", ACCEPT_LANGUAGE)
            .header("origin", self.endpoint.origin().ascii_serialization())
            .header("referer", self.endpoint.as_str())
            .form(&form.to_form_pairs())
            .send()
            .await
            .map_err(|e| self.classify(Stage::Submit, e))?;
        let resp = check_status(Stage::Submit, resp).await?;
        let declared = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_param);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.classify(Stage::Submit, e))?;
        Ok(decode_body(&bytes, declared.as_deref()))
    }

    fn classify(&self, stage: Stage, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            tracing::error!("{} request to portal timed out: {}", stage, err);
            FetchError::Timeout {
                stage,
                timeout: self.timeout,
            }
        } else {
            tracing::error!("{} request to portal failed: {}", stage, err);
            FetchError::UnreachableOrRejected {
                stage,
                status: err.status().map(|s| s.as_u16()),
            }
        }
    }
}

async fn check_status(
    stage: Stage,
    resp: reqwest::Response,
) -> Result<reqwest::Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::error!(
        "{} request rejected with status {}: {}",
        stage,
        status,
        truncate_body(&body)
    );
    Err(FetchError::UnreachableOrRejected {
        stage,
        status: Some(status.as_u16()),
    })
}

/// Decodes a result page. The `Content-Type` charset wins, then a
/// `<meta charset>` / `http-equiv` declaration near the top, then UTF-8.
fn decode_body(bytes: &[u8], declared: Option<&str>) -> String {
    let label = declared
        .map(str::to_owned)
        .or_else(|| sniff_meta_charset(bytes));
    let encoding = match label.as_deref() {
        Some(l) => Encoding::for_label(l.as_bytes()).unwrap_or_else(|| {
            tracing::debug!("Unknown charset {:?} on portal page, decoding as UTF-8", l);
            UTF_8
        }),
        None => {
            tracing::debug!("Portal page declares no charset, decoding as UTF-8");
            UTF_8
        }
    };
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!("Portal page had bytes invalid for {}", used.name());
    }
    text.into_owned()
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    const SNIFF_LEN: usize = 4096;
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(SNIFF_LEN)]).to_ascii_lowercase();
    let mut rest = head.as_str();
    while let Some(start) = rest.find("<meta") {
        let tag = &rest[start..];
        let tag = &tag[..tag.find('>').unwrap_or(tag.len())];
        if let Some(label) = charset_param(tag) {
            return Some(label);
        }
        rest = &rest[start + "<meta".len()..];
    }
    None
}

/// Pulls the value of a `charset=` parameter out of a header value or tag.
fn charset_param(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let idx = lower.find("charset")?;
    let value = lower[idx + "charset".len()..]
        .trim_start()
        .strip_prefix('=')?
        .trim_start()
        .trim_start_matches(['"', '\'']);
    let label: String = value
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &body[..end])
}
