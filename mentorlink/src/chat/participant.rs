//! Participant resolver: the counterpart's display identity, fetched once.

use super::{Participant, ParticipantId};
use crate::api::ChatBackend;

/// Fetch the display identity of `target`.
///
/// Never fails: any error is logged and yields
/// [`Participant::placeholder`]. Missing fields take the placeholder
/// defaults.
pub async fn resolve_participant<B: ChatBackend>(backend: &B, target: &ParticipantId) -> Participant {
    match backend.user_profile(target).await {
        Ok(profile) => Participant::from_parts(profile.first_name, profile.last_name, profile.photo_url),
        Err(e) => {
            tracing::warn!(%target, err = %e, "failed to resolve participant");
            Participant::placeholder()
        }
    }
}
