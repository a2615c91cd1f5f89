//! GitHub listing API client with authentication management
//!
//! Fetches the full paginated repository listing for an account, following
//! `Link: rel="next"` headers until exhaustion, dropping records the token
//! lacks pull access to, and normalizing each record for the backup
//! pipeline (HTTPS clone URL with the token embedded as userinfo).

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use serde::Deserialize;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::options::{account_type_from_api, AccountType, QueryOptions};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

/// Clone URLs for one repository, keyed by protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneUrls {
    /// HTTPS URL with the auth token embedded as userinfo, so clones never
    /// prompt for credentials
    pub https: String,
    pub ssh: Option<String>,
}

/// Identity and metadata for one remote repository
///
/// The full name (`owner/name`) is the sole join key between filtering,
/// pipeline dispatch and outcome reporting.
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub full_name: String,
    pub name: String,
    pub private: bool,
    pub fork: bool,
    pub urls: CloneUrls,
}

/// Result of one listing run
///
/// A failed page fetch ends pagination early rather than failing the run,
/// so callers must check `truncated` before treating the record set as
/// authoritative.
#[derive(Debug, Default)]
pub struct ListingOutcome {
    pub records: Vec<RepositoryRecord>,
    pub truncated: bool,
    /// Records dropped because the token lacks pull permission
    pub dropped_no_access: usize,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: String,
    name: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    fork: bool,
    clone_url: Option<String>,
    ssh_url: Option<String>,
    permissions: Option<RawPermissions>,
}

#[derive(Debug, Deserialize)]
struct RawPermissions {
    #[serde(default)]
    pull: bool,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    login: String,
    #[serde(rename = "type")]
    account_type: String,
}

/// GitHub API client wrapper
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitHubClient {
    /// Create a client against the public GitHub API
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_API_URL.to_string())
    }

    /// Create a client against a custom base URL (tests, GHE)
    pub fn with_base_url(token: String, base_url: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("repovault/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Token is not a valid header value")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create GitHub client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Login of the token owner
    pub async fn authenticated_login(&self) -> Result<String> {
        let url = format!("{}/user", self.base_url);
        let account: RawAccount = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to look up the authenticated user")?
            .error_for_status()
            .context("Authenticated user lookup rejected. Check your token.")?
            .json()
            .await
            .context("Failed to parse authenticated user response")?;

        Ok(account.login)
    }

    /// Classify an account, resolving its canonical login
    ///
    /// Returns `Authenticated` when the target is the token owner; any
    /// account type other than `User`/`Organization` is a fatal
    /// configuration error.
    pub async fn classify_account(&self, account: &str) -> Result<(String, AccountType)> {
        let own_login = self.authenticated_login().await?;
        if account.eq_ignore_ascii_case(&own_login) {
            debug!("Account {} is the token owner", account);
            return Ok((own_login, AccountType::Authenticated));
        }

        let url = format!("{}/users/{}", self.base_url, account);
        let remote: RawAccount = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to look up account {}", account))?
            .error_for_status()
            .with_context(|| format!("Account {} not found or not accessible", account))?
            .json()
            .await
            .context("Failed to parse account lookup response")?;

        let account_type = account_type_from_api(&remote.account_type)?;
        Ok((remote.login, account_type))
    }

    /// Fetch every accessible repository record for the resolved query
    ///
    /// Follows pagination until no `rel="next"` link remains. A page fetch
    /// failure does not abort the run: the outcome carries whatever was
    /// accumulated with `truncated` set so the caller can warn the user.
    pub async fn list_repositories(
        &self,
        login: &str,
        options: &QueryOptions,
    ) -> Result<ListingOutcome> {
        let mut outcome = ListingOutcome::default();
        let mut next_url = Some(self.first_page_url(login, options));
        let mut page = 1u32;

        while let Some(url) = next_url.take() {
            debug!("Fetching repository page {}: {}", page, url);

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Repository page {} fetch failed: {}", page, e);
                    outcome.truncated = true;
                    break;
                }
            };

            if !response.status().is_success() {
                warn!(
                    "Repository page {} returned {}, stopping pagination",
                    page,
                    response.status()
                );
                outcome.truncated = true;
                break;
            }

            next_url = next_link(response.headers());

            let raw: Vec<RawRepository> = match response.json().await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Repository page {} body unreadable: {}", page, e);
                    outcome.truncated = true;
                    break;
                }
            };

            for repo in raw {
                match self.normalize(repo) {
                    Some(record) => outcome.records.push(record),
                    None => outcome.dropped_no_access += 1,
                }
            }

            page += 1;
        }

        if outcome.dropped_no_access > 0 {
            debug!(
                "Dropped {} repositories without pull access",
                outcome.dropped_no_access
            );
        }
        info!("Found {} accessible repositories", outcome.records.len());

        Ok(outcome)
    }

    fn first_page_url(&self, login: &str, options: &QueryOptions) -> String {
        let path = match options.account_type {
            AccountType::Authenticated => "/user/repos".to_string(),
            AccountType::User => format!("/users/{}/repos", login),
            AccountType::Organization => format!("/orgs/{}/repos", login),
        };

        let mut url = format!("{}{}?per_page={}", self.base_url, path, PER_PAGE);
        for (key, value) in options.query_params() {
            url.push_str(&format!("&{}={}", key, value));
        }
        url
    }

    /// Normalize a raw record, or drop it when the token lacks pull access
    fn normalize(&self, raw: RawRepository) -> Option<RepositoryRecord> {
        // A listing may attach an explicit permission block; absence means
        // the endpoint did not restrict the record.
        if let Some(permissions) = &raw.permissions {
            if !permissions.pull {
                debug!("No pull access to {}, skipping", raw.full_name);
                return None;
            }
        }

        let plain_https = raw
            .clone_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}.git", raw.full_name));

        let https = embed_token(&plain_https, &self.token).unwrap_or_else(|e| {
            warn!(
                "Could not embed token into clone URL for {}: {}",
                raw.full_name, e
            );
            plain_https
        });

        Some(RepositoryRecord {
            full_name: raw.full_name,
            name: raw.name,
            private: raw.private,
            fork: raw.fork,
            urls: CloneUrls {
                https,
                ssh: raw.ssh_url,
            },
        })
    }
}

/// Rewrite an HTTPS clone URL to carry the token as userinfo
fn embed_token(url: &str, token: &str) -> Result<String> {
    let mut parsed =
        reqwest::Url::parse(url).with_context(|| format!("Invalid clone URL: {}", url))?;
    parsed
        .set_username(token)
        .map_err(|_| anyhow!("Clone URL cannot carry credentials: {}", url))?;
    Ok(parsed.to_string())
}

/// Extract the `rel="next"` target from a `Link` response header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;

    for part in value.split(',') {
        let mut sections = part.split(';');
        let url_section = sections.next()?.trim();
        let is_next = sections
            .any(|section| section.trim() == "rel=\"next\"" || section.trim() == "rel=next");

        if is_next {
            let url = url_section
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();
            return Some(url);
        }
    }

    None
}

/// Resolve the auth token for this run
///
/// Precedence: explicit value (flag or config file), then the
/// `GITHUB_TOKEN` environment variable, then the GitHub CLI.
pub fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(token) = explicit {
        if token.is_empty() {
            return Err(anyhow!("Supplied token is empty"));
        }
        return Ok(token);
    }

    if let Ok(token) = try_environment_token() {
        return Ok(token);
    }

    if let Ok(token) = try_github_cli() {
        return Ok(token);
    }

    Err(anyhow!(
        "No GitHub authentication found. Please either:\n\
         1. Pass a token with --token\n\
         2. Set GITHUB_TOKEN environment variable\n\
         3. Install and authenticate GitHub CLI: gh auth login"
    ))
}

/// Try to get a token from the `GITHUB_TOKEN` environment variable
fn try_environment_token() -> Result<String> {
    debug!("Attempting environment variable authentication");

    let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

    if token.is_empty() {
        return Err(anyhow!("GITHUB_TOKEN is empty"));
    }

    debug!("Successfully found GITHUB_TOKEN environment variable");
    Ok(token)
}

/// Try to get a token from the GitHub CLI
fn try_github_cli() -> Result<String> {
    debug!("Attempting GitHub CLI authentication");

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("Failed to run GitHub CLI (gh)")?;

    if !token_output.status.success() {
        return Err(anyhow!(
            "Failed to retrieve token from GitHub CLI: {}",
            String::from_utf8_lossy(&token_output.stderr)
        ));
    }

    let token = String::from_utf8(token_output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}
