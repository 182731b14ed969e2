use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use stackyn_billing::parse_verified;
use stackyn_common::{Error, ErrorKind};
use tracing::instrument;

use crate::ApiState;

/// `POST /webhooks/billing`: the payment provider's push notification.
/// No bearer auth here — the HMAC signature over the raw body is the
/// only trust boundary.
#[instrument(skip(state, headers, body))]
pub async fn post_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Error> {
    let signature = headers
        .get(state.webhook_signature_header.as_ref())
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::new(ErrorKind::Unauthorized, "missing webhook signature header"))?;

    let payload = parse_verified(&state.webhook_secret, &body, signature)?;
    state.webhook.handle(payload).await?;

    Ok(StatusCode::OK)
}
