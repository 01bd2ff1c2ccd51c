use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::{DeliveryArea, Territory};
use crate::repositories::SyncStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneSyncReport {
    pub created: usize,
    pub updated: usize,
    pub ignored: usize,
}

/// Mirrors storefront delivery areas into territories.
#[derive(Clone)]
pub struct ZoneSync {
    store: Arc<dyn SyncStore>,
}

impl ZoneSync {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Upserts one territory per area. Pricing profile links and delivery
    /// charges set on existing territories are kept.
    #[instrument(skip(self, areas), fields(areas = areas.len()))]
    pub async fn sync_zones(&self, areas: &[DeliveryArea]) -> Result<ZoneSyncReport, ServiceError> {
        let mut report = ZoneSyncReport::default();
        for area in areas {
            let code = area.code.trim();
            if code.is_empty() {
                warn!(?area, "Delivery area without code");
                report.ignored += 1;
                continue;
            }

            let labels = area_labels(area);
            let territory = match self.store.get_territory(code).await? {
                Some(mut existing) => {
                    for label in labels {
                        if !existing.labels.contains(&label) {
                            existing.labels.push(label);
                        }
                    }
                    report.updated += 1;
                    existing
                }
                None => {
                    report.created += 1;
                    Territory {
                        code: code.to_string(),
                        labels,
                        pricing_profile: None,
                        delivery_charge: None,
                    }
                }
            };
            self.store.upsert_territory(territory).await?;
        }

        info!(
            created = report.created,
            updated = report.updated,
            "Delivery areas synced"
        );
        Ok(report)
    }
}

/// "en - ar" plus each half on its own.
pub fn area_labels(area: &DeliveryArea) -> Vec<String> {
    let en = area.en.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let ar = area.ar.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let mut labels = Vec::with_capacity(3);
    if let (Some(en), Some(ar)) = (en, ar) {
        labels.push(format!("{} - {}", en, ar));
    }
    labels.extend(en.map(str::to_string));
    labels.extend(ar.map(str::to_string));
    labels
}
