use std::collections::HashSet;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::token::{claim_unique, random_token};

use super::conflict::now_ms;
use super::slots::validate_name;
use super::{Engine, EngineError};

impl Engine {
    /// Issue a booking link for `allowed_slot_ids` (empty = every slot).
    pub async fn create_link(
        &self,
        name: Option<String>,
        allowed_slot_ids: Vec<Ulid>,
        expires_at: Ms,
    ) -> Result<BookingLink, EngineError> {
        validate_name(&name)?;
        if self.links.len() >= MAX_LINKS {
            return Err(EngineError::LimitExceeded("too many links"));
        }
        if allowed_slot_ids.len() > MAX_LINK_SLOT_IDS {
            return Err(EngineError::LimitExceeded("too many slots on link"));
        }
        let mut seen = HashSet::new();
        let mut allowed = Vec::with_capacity(allowed_slot_ids.len());
        for id in allowed_slot_ids {
            if !self.slots.contains_key(&id) {
                return Err(EngineError::SlotNotFound(id));
            }
            if seen.insert(id) {
                allowed.push(id);
            }
        }

        let _gate = self.gate.read().await;
        let now = now_ms();
        let token = claim_unique(
            MAX_SHARE_ID_ATTEMPTS,
            now,
            || random_token(SHARE_ID_LEN),
            |t| !self.links.contains_key(t),
        );
        let link = BookingLink {
            token,
            name,
            allowed_slot_ids: allowed,
            expires_at,
            created_at: now,
        };
        self.wal_append(&Event::LinkCreated { link: link.clone() })
            .await?;
        self.links.insert(link.token.clone(), link.clone());
        info!(
            "booking link created for {} slots, expires at {expires_at}",
            link.allowed_slot_ids.len()
        );
        Ok(link)
    }

    /// The link behind `token`, if it exists and has not expired.
    pub fn resolve_link(&self, token: &str) -> Option<BookingLink> {
        self.resolve_link_at(token, now_ms())
    }

    pub(super) fn resolve_link_at(&self, token: &str, now: Ms) -> Option<BookingLink> {
        self.links
            .get(token)
            .map(|e| e.value().clone())
            .filter(|link| link.is_valid_at(now))
    }

    pub async fn delete_link(&self, token: &str) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        if !self.links.contains_key(token) {
            return Err(EngineError::NotFound);
        }
        self.wal_append(&Event::LinkDeleted {
            token: token.to_string(),
        })
        .await?;
        self.links.remove(token);
        Ok(())
    }

    /// All links, expired ones included, newest first.
    pub fn list_links(&self) -> Vec<BookingLink> {
        let mut links: Vec<BookingLink> = self.links.iter().map(|e| e.value().clone()).collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.token.cmp(&b.token)));
        links
    }

    pub fn collect_expired_links(&self, now: Ms) -> Vec<String> {
        self.links
            .iter()
            .filter(|e| !e.value().is_valid_at(now))
            .map(|e| e.key().clone())
            .collect()
    }
}
