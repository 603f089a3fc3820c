//! Venue and credential resolution.
//!
//! Maps a human-readable venue name to the gateway's venue id and looks
//! up the API credentials for it. Pure lookup: nothing here touches the
//! network, so every failure surfaces before an order is sent.

use secrecy::SecretString;
use std::collections::HashMap;
use tracing::debug;

use crate::config::VenueConfig;
use crate::types::BracketError;

/// API credentials for one venue.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub api_secret: SecretString,
}

/// A venue ready to connect to.
#[derive(Debug, Clone)]
pub struct ResolvedVenue {
    /// Name the caller used.
    pub name: String,
    /// Gateway-specific identifier.
    pub id: String,
    pub rest_url: Option<String>,
    pub credentials: Credentials,
}

pub struct VenueResolver {
    venues: HashMap<String, VenueConfig>,
    secrets: HashMap<String, SecretString>,
}

impl VenueResolver {
    /// Build a resolver from a venue table and a snapshot of secret
    /// values keyed by variable name.
    pub fn new(venues: HashMap<String, VenueConfig>, secrets: HashMap<String, String>) -> Self {
        let venues = venues
            .into_iter()
            .map(|(name, cfg)| (name.to_lowercase(), cfg))
            .collect();
        let secrets = secrets
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name, SecretString::new(value)))
            .collect();
        Self { venues, secrets }
    }

    /// Build a resolver whose secrets are read once from the process
    /// environment. Only the variables the venue table references are
    /// captured.
    pub fn from_env(venues: HashMap<String, VenueConfig>) -> Self {
        let secrets = venues
            .values()
            .flat_map(|v| [v.key_env(), v.secret_env(), v.passphrase_env()])
            .filter_map(|name| std::env::var(&name).ok().map(|value| (name, value)))
            .collect();
        Self::new(venues, secrets)
    }

    /// Look up a venue by name (case-insensitive).
    pub fn venue(&self, name: &str) -> Result<&VenueConfig, BracketError> {
        self.venues
            .get(&name.to_lowercase())
            .ok_or_else(|| BracketError::UnsupportedVenue(name.to_string()))
    }

    /// Resolve a venue name to its id and credentials.
    pub fn resolve(&self, name: &str) -> Result<ResolvedVenue, BracketError> {
        let venue = self.venue(name)?;

        let api_key = self.secret(venue, venue.key_env())?;
        let api_secret = self.secret(venue, venue.secret_env())?;
        // Checked, not kept: no live gateway signs with a passphrase.
        if venue.requires_passphrase {
            self.secret(venue, venue.passphrase_env())?;
        }

        debug!(venue = name, id = %venue.id, "Venue resolved");

        Ok(ResolvedVenue {
            name: name.to_string(),
            id: venue.id.clone(),
            rest_url: venue.rest_url.clone(),
            credentials: Credentials {
                api_key,
                api_secret,
            },
        })
    }

    fn secret(&self, venue: &VenueConfig, env_name: String) -> Result<SecretString, BracketError> {
        self.secrets
            .get(&env_name)
            .cloned()
            .ok_or_else(|| BracketError::MissingCredentials {
                venue: venue.id.clone(),
                missing: env_name,
            })
    }
}
