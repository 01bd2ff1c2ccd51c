use std::sync::Arc;
use tracing::warn;

use super::page_cache::PageCache;
use crate::config::DefaultsConfig;
use crate::errors::ServiceError;
use crate::models::{PricingContext, PricingProfile, PricingSource};
use crate::repositories::SyncStore;

/// Territory -> pricing profile -> warehouse, price list and company.
#[derive(Clone)]
pub struct PricingContextResolver {
    store: Arc<dyn SyncStore>,
    defaults: DefaultsConfig,
}

impl PricingContextResolver {
    pub fn new(store: Arc<dyn SyncStore>, defaults: DefaultsConfig) -> Self {
        Self { store, defaults }
    }

    /// Never fails: lookup errors fall back to the configured defaults.
    pub async fn resolve(&self, territory: Option<&str>, cache: Option<&PageCache>) -> PricingContext {
        let profile = match territory {
            Some(code) => match self.lookup_profile(code, cache).await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(territory = code, error = %e, "Pricing profile lookup failed, using defaults");
                    None
                }
            },
            None => None,
        };
        self.merge(profile)
    }

    async fn lookup_profile(
        &self,
        code: &str,
        cache: Option<&PageCache>,
    ) -> Result<Option<PricingProfile>, ServiceError> {
        let profile_name = match cache.and_then(|c| c.territory(code)) {
            Some(t) => t.pricing_profile.clone(),
            None => self
                .store
                .get_territory(code)
                .await?
                .and_then(|t| t.pricing_profile),
        };
        let Some(name) = profile_name else {
            return Ok(None);
        };

        if let Some(profile) = cache.and_then(|c| c.profile(&name)) {
            return Ok(Some(profile.clone()));
        }
        let profile = self.store.get_pricing_profile(&name).await?;
        if profile.is_none() {
            warn!(territory = code, profile = %name, "Territory links a missing pricing profile");
        }
        Ok(profile)
    }

    fn merge(&self, profile: Option<PricingProfile>) -> PricingContext {
        let Some(profile) = profile else {
            return PricingContext {
                warehouse: self.defaults.warehouse.clone(),
                price_list: self.defaults.price_list.clone(),
                company: self.defaults.company.clone(),
                profile_ref: None,
                source: PricingSource::Defaults,
            };
        };

        let complete = profile.warehouse.is_some()
            && profile.price_list.is_some()
            && profile.company.is_some();
        PricingContext {
            warehouse: profile.warehouse.or_else(|| self.defaults.warehouse.clone()),
            price_list: profile.price_list.or_else(|| self.defaults.price_list.clone()),
            company: profile.company.or_else(|| self.defaults.company.clone()),
            profile_ref: Some(profile.name),
            source: if complete {
                PricingSource::Profile
            } else {
                PricingSource::Partial
            },
        }
    }
}
