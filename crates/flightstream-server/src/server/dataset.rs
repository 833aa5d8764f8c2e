//! Dataset Provider: the reference flight catalog.
//!
//! The Fulfillment Worker asks for the whole catalog on every request and
//! filters it itself, so a provider only has to hand back every flight in a
//! stable order.

use async_trait::async_trait;
use flightstream_core::{DatasetError, types::Flight};
use serde::Deserialize;
use std::{collections::BTreeMap, path::PathBuf};

#[async_trait]
pub trait FlightCatalog: Send + Sync {
    /// Returns every flight in the catalog.
    async fn get_all_flights(&self) -> Result<Vec<Flight>, DatasetError>;
}

/// A catalog file: either a JSON array of flights or an object keyed by
/// flight id.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Flight>),
    Map(BTreeMap<String, Flight>),
}

impl CatalogFile {
    fn into_flights(self) -> Vec<Flight> {
        match self {
            Self::List(flights) => flights,
            // BTreeMap iteration gives a stable, key-sorted order.
            Self::Map(flights) => flights.into_values().collect(),
        }
    }
}

/// Parses catalog bytes. `origin` only labels errors.
pub fn parse_catalog(origin: &str, data: &[u8]) -> Result<Vec<Flight>, DatasetError> {
    serde_json::from_slice::<CatalogFile>(data)
        .map(CatalogFile::into_flights)
        .map_err(|e| DatasetError::Parse {
            path: origin.to_owned(),
            reason: e.to_string(),
        })
}

/// Reads a JSON catalog from disk on every call, so edits to the file are
/// picked up without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FlightCatalog for JsonFileCatalog {
    #[tracing::instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    async fn get_all_flights(&self) -> Result<Vec<Flight>, DatasetError> {
        let path = self.path.display().to_string();
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            tracing::error!("Failed to read catalog: {e}");
            DatasetError::Read {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        let flights = parse_catalog(&path, &data).inspect_err(|e| {
            tracing::error!("{e}");
        })?;
        tracing::debug!(count = flights.len(), "Loaded catalog");
        Ok(flights)
    }
}

/// A fixed catalog held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    flights: Vec<Flight>,
}

impl InMemoryCatalog {
    pub const fn new(flights: Vec<Flight>) -> Self {
        Self { flights }
    }
}

#[async_trait]
impl FlightCatalog for InMemoryCatalog {
    async fn get_all_flights(&self) -> Result<Vec<Flight>, DatasetError> {
        Ok(self.flights.clone())
    }
}
