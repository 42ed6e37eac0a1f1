use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::*;
use crate::model::Resource;

#[derive(Debug)]
pub enum CatalogError {
    Invalid(&'static str),
    Unavailable(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Invalid(msg) => write!(f, "invalid resource: {msg}"),
            CatalogError::Unavailable(e) => write!(f, "catalog unavailable: {e}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Lookup of bookable pitches: rate, currency, and operating hours.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, CatalogError>;
}

/// Concurrent in-process catalog.
#[derive(Default)]
pub struct StaticCatalog {
    resources: DashMap<Ulid, Resource>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource. Returns the previous definition, if any.
    pub fn upsert(&self, resource: Resource) -> Result<Option<Resource>, CatalogError> {
        if resource.name.len() > MAX_NAME_LEN {
            return Err(CatalogError::Invalid("resource name too long"));
        }
        if resource.hourly_rate == 0 {
            return Err(CatalogError::Invalid("hourly rate must be positive"));
        }
        if resource.hourly_rate > MAX_HOURLY_RATE {
            return Err(CatalogError::Invalid("hourly rate too high"));
        }
        if resource.operating_hours().is_none() {
            return Err(CatalogError::Invalid("closing time must be after opening time"));
        }
        Ok(self.resources.insert(resource.id, resource))
    }

    pub fn remove(&self, id: &Ulid) -> Option<Resource> {
        self.resources.remove(id).map(|(_, r)| r)
    }

    pub fn list(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, CatalogError> {
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }
}
