//! Identity lookup and the Bayeux handshake over HTTP.

use serde::Deserialize;

use crate::Error;
use crate::protocol::{Envelope, JSONP_CALLBACK, build_handshake_msg};
use crate::sequence::{HANDSHAKE_ID, encode_base36};

const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    response: IdentityUser,
}

#[derive(Debug, Deserialize)]
struct IdentityUser {
    user_id: serde_json::Value,
}

/// Look up the user id that owns `token`.
pub(crate) async fn resolve_identity(
    client: &reqwest::Client,
    api_url: &str,
    token: &str,
) -> Result<String, Error> {
    let url = format!("{}/users/me", api_url.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .header(ACCESS_TOKEN_HEADER, token)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Identity(e.to_string()))?
        .json::<IdentityResponse>()
        .await
        .map_err(|e| Error::Identity(format!("invalid response body: {e}")))?;
    user_id_string(&resp.response.user_id)
        .ok_or_else(|| Error::Identity(format!("invalid user_id: {}", resp.response.user_id)))
}

fn user_id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Run the Bayeux handshake and return the session client id.
pub(crate) async fn handshake(
    client: &reqwest::Client,
    handshake_url: &str,
) -> Result<String, Error> {
    let message = serde_json::to_string(&[build_handshake_msg(&encode_base36(HANDSHAKE_ID))])?;
    let mut url = url::Url::parse(handshake_url)?;
    url.query_pairs_mut()
        .append_pair("message", &message)
        .append_pair("jsonp", JSONP_CALLBACK);

    let body = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Handshake(e.to_string()))?
        .text()
        .await
        .map_err(|e| Error::Handshake(e.to_string()))?;

    let json = strip_jsonp(&body, JSONP_CALLBACK)
        .ok_or_else(|| Error::Handshake("response is not wrapped in a JSONP callback".into()))?;
    let replies: Vec<Envelope> = serde_json::from_str(json)
        .map_err(|e| Error::Handshake(format!("invalid response body: {e}")))?;
    let reply = replies
        .into_iter()
        .next()
        .ok_or_else(|| Error::Handshake("empty response".into()))?;

    if reply.successful == Some(false) {
        return Err(Error::Handshake(
            reply
                .error_text()
                .unwrap_or_else(|| "rejected by server".into()),
        ));
    }
    match reply.client_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(Error::Handshake("response has no clientId".into())),
    }
}

/// Strip a JSONP wrapper such as `/**/callback([...]);`.
pub(crate) fn strip_jsonp<'a>(body: &'a str, callback: &str) -> Option<&'a str> {
    let body = body.trim();
    let body = body.strip_prefix("/**/").unwrap_or(body).trim_start();
    let inner = body.strip_prefix(callback)?.trim_start().strip_prefix('(')?;
    let inner = inner.trim_end();
    let inner = inner.strip_suffix(';').unwrap_or(inner).trim_end();
    inner.strip_suffix(')')
}
