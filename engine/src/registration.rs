//! Registration Client - binds a fresh identity to the remote referral
//! program via the four-call handshake. Transport failures at any step
//! are logged and surfaced as a plain `false`; they never abort the
//! surrounding job.

use tracing::warn;

use crate::api::{ApiError, QuackClient, PROFILE_SUCCESS_CODE};
use crate::identity::Identity;

/// Canonical message every identity signs as proof of ownership.
pub const WELCOME_MESSAGE: &str = "Welcome to Quack AI";

#[derive(Debug, thiserror::Error)]
enum RegistrationError {
    #[error(transparent)]
    Transport(#[from] ApiError),

    /// The connect response carried no session token.
    #[error("authentication response missing session token")]
    Authentication,
}

/// Run the handshake: profile lookup, ownership signature, connect,
/// invite bind, profile re-query. Returns whether the identity ended up
/// registered; on failure the identity is retained unregistered.
pub async fn register(client: &QuackClient, identity: &mut Identity, referral_code: &str) -> bool {
    if let Err(e) = try_register(client, identity, referral_code).await {
        warn!(address = %identity.address, error = %e, "registration failed");
    }
    identity.registered
}

async fn try_register(
    client: &QuackClient,
    identity: &mut Identity,
    referral_code: &str,
) -> Result<(), RegistrationError> {
    let proxy = identity.proxy_ref.clone();
    let proxy = proxy.as_deref();

    // Step 1: profile lookup; the remote creates the account implicitly.
    client.profile(proxy, &identity.address).await?;

    // Step 2: proof of ownership over the canonical message.
    let signature = identity.sign(WELCOME_MESSAGE);

    // Step 3: exchange for a session token.
    let token = client
        .connect(proxy, &identity.address, &signature)
        .await?
        .ok_or(RegistrationError::Authentication)?;
    identity.session_token = Some(token.clone());

    // Step 4: bind the referral code, then re-query; only the re-query's
    // success code flips the registered flag.
    client.bind_invite(proxy, &token, referral_code).await?;
    let code = client.profile(proxy, &identity.address).await?;
    if code == PROFILE_SUCCESS_CODE {
        identity.registered = true;
    } else {
        warn!(
            address = %identity.address,
            code,
            "post-bind profile re-query did not report success"
        );
    }
    Ok(())
}
