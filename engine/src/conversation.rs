//! Conversation Runner - drives up to five scripted turns for a
//! registered identity. The loop fails fast: the first failed turn ends
//! the conversation rather than spending more turns against a broken
//! session.

use tracing::{debug, warn};

use crate::api::QuackClient;
use crate::config::{sleep_jitter, Pacing};
use crate::identity::Identity;
use crate::topics::next_topic;

/// Lifetime conversation cap per identity; never day-reset.
pub const MAX_CHATS_PER_IDENTITY: u32 = 5;

pub async fn run_conversation(client: &QuackClient, identity: &mut Identity, pacing: &Pacing) {
    while identity.chat_count < MAX_CHATS_PER_IDENTITY {
        let Some(token) = identity.session_token.clone() else {
            warn!(address = %identity.address, "conversation skipped: no session token");
            return;
        };

        let topic = next_topic(identity);
        let proxy = identity.proxy_ref.clone();
        match client
            .chat(proxy.as_deref(), &token, &identity.address, &topic)
            .await
        {
            Ok(()) => {
                sleep_jitter(pacing.settle_ms).await;
                identity.chat_count += 1;
                debug!(
                    address = %identity.address,
                    turn = identity.chat_count,
                    topic = %topic,
                    "conversation turn completed"
                );
            }
            Err(e) => {
                warn!(
                    address = %identity.address,
                    turn = identity.chat_count + 1,
                    error = %e,
                    "conversation turn failed; truncating remaining turns"
                );
                break;
            }
        }

        if identity.chat_count < MAX_CHATS_PER_IDENTITY {
            sleep_jitter(pacing.turn_gap_ms).await;
        }
    }
}
