use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use tracing::{info, warn};

use crate::{
    case::{Coordinates, Flow, PostalCode, fold_text},
    error::{FlowError, Result},
};

/// A branch or partner locksmith that can take a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub address: String,
    /// May be missing or malformed in the source data; only valid codes take part in
    /// postal-code matching.
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Empty means the provider offers every service
    #[serde(default)]
    pub services: Vec<Flow>,
    #[serde(default)]
    pub insurers: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl Provider {
    pub fn postal_code(&self) -> Option<PostalCode> {
        PostalCode::parse(&self.postal_code)
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => {
                Some(Coordinates::new(latitude, longitude)).filter(Coordinates::is_valid)
            }
            _ => None,
        }
    }

    pub fn offers(&self, service: Flow) -> bool {
        self.services.is_empty() || self.services.contains(&service)
    }

    /// Case- and accent-insensitive containment, in either direction, against any
    /// accepted insurer
    pub fn accepts_insurer(&self, insurer: &str) -> bool {
        let insurer = fold_text(insurer.trim());
        if insurer.is_empty() {
            return false;
        }
        self.insurers.iter().any(|accepted| {
            let accepted = fold_text(accepted.trim());
            !accepted.is_empty() && (accepted.contains(&insurer) || insurer.contains(&accepted))
        })
    }
}

/// Static provider catalog, loaded once at startup and read-only afterwards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCatalog {
    #[serde(default)]
    pub providers: Vec<Provider>,
    /// Approximate centre of each postal code, used when the client shared no location
    #[serde(default)]
    pub postal_centroids: HashMap<String, Coordinates>,
}

impl ProviderCatalog {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            providers,
            postal_centroids: HashMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn centroid(&self, postal_code: &PostalCode) -> Option<Coordinates> {
        self.postal_centroids
            .get(postal_code.as_str())
            .copied()
            .filter(Coordinates::is_valid)
    }

    /// Parses a catalog document. YAML is used for `.yaml`/`.yml` paths, JSON otherwise.
    pub fn parse(content: &str, yaml: bool) -> Result<Self> {
        if yaml {
            serde_yaml::from_str(content).map_err(|e| FlowError::Catalog(e.to_string()))
        } else {
            serde_json::from_str(content).map_err(|e| FlowError::Catalog(e.to_string()))
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        Self::parse(&content, yaml)
    }

    /// Loads the catalog, degrading to an empty one (routing disabled) on any error
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(catalog) => {
                if catalog.is_empty() {
                    warn!(path = %path.display(), "Provider catalog is empty, routing disabled");
                } else {
                    info!(path = %path.display(), providers = catalog.len(), "Provider catalog loaded");
                }
                catalog
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load provider catalog, routing disabled"
                );
                Self::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
providers:
  - id: moron
    name: KiosKeys Morón
    address: Av. Hipólito Yrigoyen 114, Morón
    postal_code: "1708"
    latitude: -34.6509
    longitude: -58.6198
    services: [duplicate, shell_replacement, new_key]
    insurers: [La Segunda, Sancor]
    priority: 10
  - id: partner
    name: Cerrajería del Oeste
    address: Rivadavia 18000, Ituzaingó
    postal_code: "171"
postal_centroids:
  "1708": { latitude: -34.65, longitude: -58.62 }
"#;

    #[test]
    fn test_parse_yaml_catalog() {
        let catalog = ProviderCatalog::parse(YAML, true).unwrap();
        assert_eq!(catalog.len(), 2);

        let moron = &catalog.providers[0];
        assert_eq!(moron.postal_code().unwrap().as_str(), "1708");
        assert!(moron.coordinates().is_some());
        assert!(moron.offers(Flow::NewKey));

        let partner = &catalog.providers[1];
        assert!(partner.postal_code().is_none());
        assert!(partner.coordinates().is_none());
        assert!(partner.offers(Flow::Duplicate), "no services listed means all");
        assert_eq!(partner.priority, 0);

        let code = PostalCode::parse("1708").unwrap();
        assert!(catalog.centroid(&code).is_some());
    }

    const JSON: &str = r#"{
  "providers": [
    {
      "id": "haedo",
      "name": "KiosKeys Haedo",
      "address": "Av. Rivadavia 15800, Haedo",
      "postal_code": "1706",
      "latitude": -34.6442,
      "longitude": -58.5946,
      "services": ["duplicate"],
      "insurers": ["Rivadavia"],
      "priority": 5
    }
  ],
  "postal_centroids": { "1706": { "latitude": -34.644, "longitude": -58.594 } }
}"#;

    #[test]
    fn test_parse_json_catalog() {
        let catalog = ProviderCatalog::parse(JSON, false).unwrap();
        assert_eq!(catalog.len(), 1);

        let haedo = &catalog.providers[0];
        assert_eq!(haedo.id, "haedo");
        assert_eq!(haedo.postal_code().unwrap().as_str(), "1706");
        assert!(haedo.coordinates().is_some());
        assert!(haedo.offers(Flow::Duplicate));
        assert!(!haedo.offers(Flow::NewKey));
        assert!(haedo.accepts_insurer("Rivadavia Seguros"));
        assert_eq!(haedo.priority, 5);

        let code = PostalCode::parse("1706").unwrap();
        assert!(catalog.centroid(&code).is_some());
    }

    #[test]
    fn test_accepts_insurer_either_direction() {
        let catalog = ProviderCatalog::parse(YAML, true).unwrap();
        let moron = &catalog.providers[0];
        assert!(moron.accepts_insurer("sancor"));
        assert!(moron.accepts_insurer("LA SEGUNDA SEGUROS"));
        assert!(!moron.accepts_insurer("Mapfre"));
        assert!(!moron.accepts_insurer("   "));
        assert!(!moron.accepts_insurer(""));
    }

    #[test]
    fn test_malformed_catalog_is_an_error() {
        assert!(ProviderCatalog::parse("{ not json", false).is_err());
        assert!(ProviderCatalog::parse("providers: [ {id: 1", true).is_err());
    }

    #[test]
    fn test_load_or_empty_degrades() {
        let missing = ProviderCatalog::load_or_empty("/definitely/not/here.yaml");
        assert!(missing.is_empty());

        let dir = std::env::temp_dir().join(format!("intake-flow-catalog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let broken = dir.join("broken.json");
        std::fs::File::create(&broken)
            .unwrap()
            .write_all(b"[1, 2")
            .unwrap();
        assert!(ProviderCatalog::load_or_empty(&broken).is_empty());

        let good = dir.join("providers.yml");
        std::fs::write(&good, YAML).unwrap();
        assert_eq!(ProviderCatalog::load_or_empty(&good).len(), 2);

        let json = dir.join("providers.json");
        std::fs::write(&json, JSON).unwrap();
        assert_eq!(ProviderCatalog::load(&json).unwrap().providers[0].id, "haedo");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
