//! Seeded user directory.
//!
//! Resolves identity cookies to user ids and user ids to the profile data
//! served by `GET /user/{id}` and embedded in chat history.

use std::collections::HashMap;

use mentorlink_proto::api::{HistorySender, UserProfile};

use crate::config::UserSeed;

/// A known account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// User id.
    pub id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Avatar URL.
    pub photo_url: String,
}

/// Immutable lookup tables built from the configured seeds.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserRecord>,
    tokens: HashMap<String, String>,
}

impl UserDirectory {
    /// Build the directory. Later seeds with a duplicate id replace earlier
    /// ones.
    #[must_use]
    pub fn new(seeds: &[UserSeed]) -> Self {
        let mut directory = Self::default();
        for seed in seeds {
            let token = seed.token.clone().unwrap_or_else(|| seed.id.clone());
            directory.tokens.insert(token, seed.id.clone());
            directory.users.insert(
                seed.id.clone(),
                UserRecord {
                    id: seed.id.clone(),
                    first_name: seed.first_name.clone(),
                    last_name: seed.last_name.clone(),
                    photo_url: seed.photo_url.clone(),
                },
            );
        }
        directory
    }

    /// Look up a user by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&UserRecord> {
        self.users.get(id)
    }

    /// The user id an identity token belongs to.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    /// Profile payload for `GET /user/{id}`.
    #[must_use]
    pub fn profile(&self, id: &str) -> Option<UserProfile> {
        self.get(id).map(|user| UserProfile {
            first_name: Some(user.first_name.clone()),
            last_name: Some(user.last_name.clone()),
            photo_url: Some(user.photo_url.clone()),
        })
    }

    /// Populated sender of a history entry. Unknown ids carry only the id.
    #[must_use]
    pub fn sender(&self, id: &str) -> HistorySender {
        self.get(id).map_or_else(
            || HistorySender {
                id: Some(id.to_string()),
                ..HistorySender::default()
            },
            |user| HistorySender {
                id: Some(user.id.clone()),
                first_name: Some(user.first_name.clone()),
                last_name: Some(user.last_name.clone()),
                photo_url: Some(user.photo_url.clone()),
            },
        )
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no accounts are seeded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
