/// Intersection registry for the traffic forecasting pipeline.
///
/// Defines the canonical set of monitored road intersections along with
/// their metadata and congestion class. This is the single source of truth
/// for intersection ids — all other modules should reference intersections
/// from here rather than hardcoding ids.
///
/// The registry is loaded once at process start (either the built-in
/// reference deployment or a TOML file) and is immutable thereafter.

use serde::{Deserialize, Serialize};

use crate::model::{CongestionClass, PipelineError};

// ---------------------------------------------------------------------------
// Intersection metadata
// ---------------------------------------------------------------------------

/// Metadata for a single monitored intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    /// Stable identifier, e.g. "delhi_cp".
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// City the intersection belongs to; keys the simulator's density factor.
    pub city: String,
    /// Congestion class parameterizing the simulator's baseline volumes.
    pub class: CongestionClass,
    /// WGS84 latitude. Opaque to the pipeline, passed through for display.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable, ordered catalog of monitored intersections.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<Intersection>,
}

/// On-disk shape of a registry TOML file: a list of `[[intersection]]` tables.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    intersection: Vec<Intersection>,
}

impl Registry {
    /// Builds a registry from explicit entries, validating that at least one
    /// intersection exists and that ids are unique.
    pub fn new(entries: Vec<Intersection>) -> Result<Self, PipelineError> {
        if entries.is_empty() {
            return Err(PipelineError::Config(
                "registry must contain at least one intersection".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate intersection id '{}' in registry",
                    entry.id
                )));
            }
        }
        Ok(Registry { entries })
    }

    /// Parses a registry from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let file: RegistryFile = toml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("registry parse failed: {}", e)))?;
        Registry::new(file.intersection)
    }

    /// The monitored intersections, in stable registry order.
    pub fn list(&self) -> &[Intersection] {
        &self.entries
    }

    /// Looks up an intersection by id.
    pub fn get(&self, id: &str) -> Result<&Intersection, PipelineError> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reference deployment
// ---------------------------------------------------------------------------

/// The 12 intersections of the reference deployment, across four Indian
/// metro areas, ordered city by city from highest to lightest baseline load.
pub fn reference_registry() -> Registry {
    fn entry(
        id: &str,
        name: &str,
        city: &str,
        class: CongestionClass,
        latitude: f64,
        longitude: f64,
    ) -> Intersection {
        Intersection {
            id: id.to_string(),
            name: name.to_string(),
            city: city.to_string(),
            class,
            latitude,
            longitude,
        }
    }

    let entries = vec![
        // Delhi NCR
        entry("delhi_cp", "Connaught Place, Delhi", "Delhi NCR", CongestionClass::High, 28.6315, 77.2167),
        entry("delhi_iffco", "IFFCO Chowk, Gurgaon", "Delhi NCR", CongestionClass::High, 28.4595, 77.0266),
        entry("delhi_lajpat", "Lajpat Nagar, Delhi", "Delhi NCR", CongestionClass::Medium, 28.5677, 77.2334),
        entry("delhi_dwarka", "Dwarka Sector 21, Delhi", "Delhi NCR", CongestionClass::Low, 28.5921, 77.0460),
        // Bengaluru
        entry("blr_silk", "Silk Board Junction, Bengaluru", "Bengaluru", CongestionClass::High, 12.9279, 77.6271),
        entry("blr_electronic", "Electronic City, Bengaluru", "Bengaluru", CongestionClass::High, 12.8456, 77.6632),
        entry("blr_jayanagar", "Jayanagar 4th Block, Bengaluru", "Bengaluru", CongestionClass::Medium, 12.9250, 77.5946),
        entry("blr_hebbal", "Hebbal Flyover, Bengaluru", "Bengaluru", CongestionClass::Low, 13.0358, 77.5970),
        // Mumbai
        entry("mumbai_bandra", "Bandra Kurla Complex, Mumbai", "Mumbai", CongestionClass::High, 19.0596, 72.8295),
        entry("mumbai_andheri", "Andheri East, Mumbai", "Mumbai", CongestionClass::Medium, 19.1136, 72.8697),
        // Chennai
        entry("chennai_adyar", "Adyar Signal, Chennai", "Chennai", CongestionClass::Medium, 13.0067, 80.2206),
        entry("chennai_omr", "OMR IT Corridor, Chennai", "Chennai", CongestionClass::Low, 12.8406, 80.1534),
    ];

    // The reference table is statically known to be valid.
    Registry::new(entries).expect("reference registry is valid")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
