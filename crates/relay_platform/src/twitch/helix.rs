#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use relay_domain::{SecretString, TwitchToken};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::twitch::subscriptions::{ApiResponse, SubscriptionApi};

pub const DEFAULT_HELIX_BASE_URL: &str = "https://api.twitch.tv";
const EVENTSUB_SUBSCRIPTIONS_PATH: &str = "/helix/eventsub/subscriptions";
const TOKEN_VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	if let Some(v) = headers.get(RETRY_AFTER)
		&& let Ok(s) = v.to_str()
		&& let Ok(secs) = s.trim().parse::<u64>()
	{
		return Some(Duration::from_secs(secs));
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs(reset_unix - now));
		}
	}

	None
}

/// Send once; retry a single time on 429 (honoring rate limit headers) or 5xx.
async fn send_with_retry(req: reqwest::RequestBuilder, label: &'static str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("helix {label} send"))?;
	let status = resp.status();

	if status == StatusCode::TOO_MANY_REQUESTS
		&& let Some(delay) = retry_delay_from_headers(resp.headers())
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(delay).await;
		return retry.send().await.with_context(|| format!("helix {label} retry send"));
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(Duration::from_millis(250)).await;
		return retry.send().await.with_context(|| format!("helix {label} retry send"));
	}

	Ok(resp)
}

/// Authenticated Helix client for one token.
#[derive(Clone, Debug)]
pub struct HelixClient {
	http: reqwest::Client,
	base_url: Url,
	client_id: String,
	bearer_token: SecretString,
}

impl HelixClient {
	pub fn new(base_url: &str, token: &TwitchToken) -> anyhow::Result<Self> {
		let bearer_token = token.token().context("twitch token has no access token")?;
		let base_url = Url::parse(base_url).with_context(|| format!("parse helix base url {base_url}"))?;
		let http = reqwest::Client::builder()
			.user_agent("relay/0.x (eventsub-ws)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url,
			client_id: token.client_id.clone(),
			bearer_token: SecretString::new(bearer_token),
		})
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		req.header("Client-Id", &self.client_id)
			.header("Authorization", format!("Bearer {}", self.bearer_token.expose()))
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.base_url.join(path_and_query).context("join helix url")
	}
}

#[async_trait]
impl SubscriptionApi for HelixClient {
	async fn create_subscription(&self, body: &Value) -> anyhow::Result<ApiResponse> {
		let url = self.url(EVENTSUB_SUBSCRIPTIONS_PATH)?;
		let resp = send_with_retry(self.authed(self.http.post(url)).json(body), "POST /helix/eventsub/subscriptions")
			.await
			.with_context(|| format!("helix POST {EVENTSUB_SUBSCRIPTIONS_PATH} send"))?;

		let status = resp.status().as_u16();
		let text = resp
			.text()
			.await
			.with_context(|| format!("helix POST {EVENTSUB_SUBSCRIPTIONS_PATH} read body"))?;
		let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

		Ok(ApiResponse { status, body })
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchTokenValidation {
	pub client_id: String,
	pub login: String,
	pub user_id: String,
	pub expires_in: u64,
	#[serde(default)]
	pub scopes: Vec<String>,
}

impl TwitchTokenValidation {
	/// Build a token carrying the validated identity and scopes.
	pub fn into_token(self, access_token: SecretString) -> TwitchToken {
		TwitchToken {
			login: self.login,
			user_id: self.user_id,
			client_id: self.client_id,
			access_token: Some(access_token),
			scopes: self.scopes.into_iter().collect::<BTreeSet<_>>(),
		}
	}
}

/// Check a user access token against the Twitch OAuth validate endpoint.
pub async fn validate_user_token(access_token: &str) -> anyhow::Result<TwitchTokenValidation> {
	validate_user_token_at(TOKEN_VALIDATE_URL, access_token).await
}

pub async fn validate_user_token_at(validate_url: &str, access_token: &str) -> anyhow::Result<TwitchTokenValidation> {
	let http = reqwest::Client::builder()
		.user_agent("relay/0.x (oauth-validate)")
		.build()
		.context("build reqwest client")?;

	let resp = http
		.get(validate_url)
		.header("Authorization", format!("OAuth {access_token}"))
		.send()
		.await
		.context("twitch validate token request")?;

	let status = resp.status();
	let body = resp.text().await.context("twitch validate token read body")?;

	if !status.is_success() {
		anyhow::bail!("twitch validate token failed: status={status} body={body}");
	}

	serde_json::from_str(&body).context("twitch validate token parse json")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retry_after_header_wins() {
		let mut headers = HeaderMap::new();
		headers.insert(RETRY_AFTER, "3".parse().unwrap());
		assert_eq!(retry_delay_from_headers(&headers), Some(Duration::from_secs(3)));
		assert_eq!(retry_delay_from_headers(&HeaderMap::new()), None);
	}

	#[test]
	fn validation_becomes_token() {
		let raw = r#"{"client_id":"cid","login":"bot","user_id":"42","expires_in":3600,"scopes":["chat:read","chat:edit"]}"#;
		let parsed: TwitchTokenValidation = serde_json::from_str(raw).unwrap();
		let token = parsed.into_token(SecretString::new("tok"));

		assert_eq!(token.login(), "bot");
		assert_eq!(token.user_id(), "42");
		assert_eq!(token.client_id, "cid");
		assert_eq!(token.token(), Some("tok"));
		assert!(token.any_option_is_enabled(&["chat:edit"]));
	}

	#[test]
	fn client_requires_access_token() {
		assert!(HelixClient::new(DEFAULT_HELIX_BASE_URL, &TwitchToken::default()).is_err());

		let token = TwitchToken::new("bot", "1", SecretString::new("tok"));
		let client = HelixClient::new(DEFAULT_HELIX_BASE_URL, &token).unwrap();
		assert_eq!(
			client.url(EVENTSUB_SUBSCRIPTIONS_PATH).unwrap().as_str(),
			"https://api.twitch.tv/helix/eventsub/subscriptions"
		);
		assert!(HelixClient::new("not a url", &token).is_err());
	}
}
