//! Provider derivation: picks the branch that should take a finished case.
//!
//! Candidates are searched tier by tier (exact postal code, zone, geographic distance,
//! numeric postal distance, whole catalog) and the first tier with a candidate left after
//! filtering wins. Two filters apply at every tier:
//!
//! * service capability: providers must offer the requested service (an empty service
//!   list means "everything"). If nobody in the tier does, the tier is empty.
//! * insurer preference: for insured clients, providers that work with the client's
//!   insurer are preferred. If none do, the tier falls back to the unfiltered set.
//!
//! Ties are broken by descending priority, then by catalog order, so the same catalog and
//! query always produce the same provider. The engine never fails: an unusable postal
//! code degrades to later tiers and an empty catalog simply yields no match.

use serde::Serialize;
use tracing::debug;

use crate::{
    case::{Coordinates, Flow, PostalCode, Role},
    catalog::{Provider, ProviderCatalog},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ExactPostalCode,
    Zone,
    Geographic,
    PostalDistance,
    Global,
}

/// What the engine needs to know about a case
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuery {
    pub service: Flow,
    pub postal_code: Option<String>,
    pub role: Option<Role>,
    pub insurer: Option<String>,
    pub coordinates: Option<Coordinates>,
}

impl ProviderQuery {
    pub fn new(service: Flow) -> Self {
        Self {
            service,
            postal_code: None,
            role: None,
            insurer: None,
            coordinates: None,
        }
    }

    pub fn postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }

    pub fn insured_by(mut self, insurer: impl Into<String>) -> Self {
        self.role = Some(Role::Insured);
        self.insurer = Some(insurer.into());
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Insurer to prefer, only for insured clients
    fn preferred_insurer(&self) -> Option<&str> {
        match self.role {
            Some(Role::Insured) => self.insurer.as_deref().filter(|i| !i.trim().is_empty()),
            _ => None,
        }
    }
}

/// The chosen provider and how it was found
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMatch {
    pub provider: Provider,
    pub tier: Tier,
    /// Set for distance-ranked tiers: kilometres for `Geographic`, code difference for
    /// `PostalDistance`
    pub distance: Option<f64>,
}

/// Runs the tiered search. `None` means no provider could be suggested.
pub fn derive_provider(catalog: &ProviderCatalog, query: &ProviderQuery) -> Option<ProviderMatch> {
    if catalog.is_empty() {
        debug!("Provider catalog empty, no match");
        return None;
    }

    let postal_code = query.postal_code.as_deref().and_then(PostalCode::parse);

    if let Some(code) = &postal_code {
        let exact = eligible(
            catalog
                .providers
                .iter()
                .filter(|p| p.postal_code().as_ref() == Some(code)),
            query,
        );
        if let Some(found) = best_by_priority(exact, Tier::ExactPostalCode) {
            return Some(found);
        }

        let zone = eligible(
            catalog
                .providers
                .iter()
                .filter(|p| p.postal_code().is_some_and(|pc| pc.zone() == code.zone())),
            query,
        );
        if let Some(found) = best_by_priority(zone, Tier::Zone) {
            return Some(found);
        }
    }

    if let Some(origin) = query.coordinates.filter(Coordinates::is_valid) {
        let located = eligible(
            catalog.providers.iter().filter(|p| p.coordinates().is_some()),
            query,
        );
        let ranked = located
            .into_iter()
            .filter_map(|p| p.coordinates().map(|c| (p, origin.distance_km(&c))))
            .collect();
        if let Some(found) = nearest(ranked, Tier::Geographic) {
            return Some(found);
        }
    }

    match &postal_code {
        Some(code) => {
            let coded = eligible(
                catalog.providers.iter().filter(|p| p.postal_code().is_some()),
                query,
            );
            let ranked = coded
                .into_iter()
                .filter_map(|p| {
                    p.postal_code()
                        .map(|pc| (p, f64::from(pc.numeric().abs_diff(code.numeric()))))
                })
                .collect();
            nearest(ranked, Tier::PostalDistance)
        }
        None => best_by_priority(eligible(catalog.providers.iter(), query), Tier::Global),
    }
}

/// Applies the service filter (hard) and the insurer preference (soft)
fn eligible<'a>(pool: impl Iterator<Item = &'a Provider>, query: &ProviderQuery) -> Vec<&'a Provider> {
    let capable: Vec<&Provider> = pool.filter(|p| p.offers(query.service)).collect();

    let Some(insurer) = query.preferred_insurer() else {
        return capable;
    };
    let preferred: Vec<&Provider> = capable
        .iter()
        .copied()
        .filter(|p| p.accepts_insurer(insurer))
        .collect();
    if preferred.is_empty() { capable } else { preferred }
}

fn best_by_priority(mut candidates: Vec<&Provider>, tier: Tier) -> Option<ProviderMatch> {
    // Stable sort: equal priorities keep catalog order.
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    let provider = candidates.first()?;
    debug!(provider = %provider.id, ?tier, "Provider derived");
    Some(ProviderMatch {
        provider: (*provider).clone(),
        tier,
        distance: None,
    })
}

fn nearest(mut ranked: Vec<(&Provider, f64)>, tier: Tier) -> Option<ProviderMatch> {
    ranked.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| b.priority.cmp(&a.priority)));
    let (provider, distance) = ranked.first()?;
    debug!(provider = %provider.id, ?tier, distance, "Provider derived");
    Some(ProviderMatch {
        provider: (*provider).clone(),
        tier,
        distance: Some(*distance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn provider(id: &str, postal_code: &str, priority: i32) -> Provider {
        Provider {
            id: id.to_string(),
            name: format!("Provider {id}"),
            address: format!("Calle {id} 100"),
            postal_code: postal_code.to_string(),
            latitude: None,
            longitude: None,
            services: Vec::new(),
            insurers: Vec::new(),
            priority,
        }
    }

    fn located(mut p: Provider, latitude: f64, longitude: f64) -> Provider {
        p.latitude = Some(latitude);
        p.longitude = Some(longitude);
        p
    }

    fn id_of(found: Option<ProviderMatch>) -> Option<String> {
        found.map(|m| m.provider.id)
    }

    #[test]
    fn test_exact_match_beats_higher_priority_zone_match() {
        let catalog = ProviderCatalog::new(vec![
            provider("zone", "1704", 100),
            provider("exact", "1708", 1),
        ]);
        let found = derive_provider(&catalog, &ProviderQuery::new(Flow::Duplicate).postal_code("1708")).unwrap();
        assert_eq!(found.provider.id, "exact");
        assert_eq!(found.tier, Tier::ExactPostalCode);
    }

    #[test]
    fn test_zone_match_ranked_by_priority() {
        let catalog = ProviderCatalog::new(vec![
            provider("far", "5000", 50),
            provider("low", "1704", 1),
            provider("high", "1712", 9),
        ]);
        let found = derive_provider(&catalog, &ProviderQuery::new(Flow::NewKey).postal_code("1708")).unwrap();
        assert_eq!(found.provider.id, "high");
        assert_eq!(found.tier, Tier::Zone);
    }

    #[test]
    fn test_priority_ties_keep_catalog_order() {
        let catalog = ProviderCatalog::new(vec![
            provider("first", "1708", 5),
            provider("second", "1708", 5),
        ]);
        let query = ProviderQuery::new(Flow::Duplicate).postal_code("1708");
        assert_eq!(id_of(derive_provider(&catalog, &query)).as_deref(), Some("first"));
    }

    #[test]
    fn test_geographic_tier_uses_distance_first() {
        let catalog = ProviderCatalog::new(vec![
            located(provider("cordoba", "5000", 100), -31.4201, -64.1888),
            located(provider("castelar", "1712", 1), -34.6547, -58.6450),
            provider("unlocated", "9000", 100),
        ]);
        let query = ProviderQuery::new(Flow::Duplicate)
            .postal_code("2000")
            .coordinates(Coordinates::new(-34.6509, -58.6198));
        let found = derive_provider(&catalog, &query).unwrap();
        assert_eq!(found.provider.id, "castelar");
        assert_eq!(found.tier, Tier::Geographic);
        assert!(found.distance.unwrap() < 5.0);
    }

    #[test]
    fn test_postal_distance_fallback() {
        let catalog = ProviderCatalog::new(vec![
            provider("bad-code", "x", 100),
            provider("near", "2010", 1),
            provider("behind", "1990", 3),
            provider("far", "8000", 100),
        ]);
        let query = |code: &str| ProviderQuery::new(Flow::Duplicate).postal_code(code);

        let found = derive_provider(&catalog, &query("3000")).unwrap();
        assert_eq!(found.tier, Tier::PostalDistance);
        assert_eq!(found.provider.id, "near");
        assert_eq!(found.distance, Some(990.0));

        let found = derive_provider(&catalog, &query("7000")).unwrap();
        assert_eq!(found.provider.id, "far");
        assert_eq!(found.distance, Some(1000.0));
    }

    #[test]
    fn test_distance_ties_broken_by_priority() {
        let catalog = ProviderCatalog::new(vec![
            provider("below", "1000", 1),
            provider("above", "3000", 7),
        ]);
        let found = derive_provider(&catalog, &ProviderQuery::new(Flow::Duplicate).postal_code("2000")).unwrap();
        assert_eq!(found.tier, Tier::PostalDistance);
        assert_eq!(found.distance, Some(1000.0));
        assert_eq!(found.provider.id, "above");
    }

    #[test]
    fn test_unusable_postal_code_uses_whole_catalog() {
        let catalog = ProviderCatalog::new(vec![
            provider("low", "1708", 1),
            provider("high", "5000", 9),
        ]);
        for query in [
            ProviderQuery::new(Flow::ShellReplacement),
            ProviderQuery::new(Flow::ShellReplacement).postal_code("17"),
            ProviderQuery::new(Flow::ShellReplacement).postal_code("B1708"),
        ] {
            let found = derive_provider(&catalog, &query).unwrap();
            assert_eq!(found.tier, Tier::Global);
            assert_eq!(found.provider.id, "high");
        }
    }

    #[test]
    fn test_service_filter_empties_tier_without_relaxing() {
        let mut exact = provider("exact-shell-only", "1708", 10);
        exact.services = vec![Flow::ShellReplacement];
        let mut zone = provider("zone-duplicates", "1702", 1);
        zone.services = vec![Flow::Duplicate];
        let catalog = ProviderCatalog::new(vec![exact, zone]);

        let found = derive_provider(&catalog, &ProviderQuery::new(Flow::Duplicate).postal_code("1708")).unwrap();
        assert_eq!(found.provider.id, "zone-duplicates");
        assert_eq!(found.tier, Tier::Zone);

        // Nobody offers new keys: no match at all.
        assert!(derive_provider(&catalog, &ProviderQuery::new(Flow::NewKey).postal_code("1708")).is_none());
    }

    #[test]
    fn test_insurer_preference_is_soft() {
        let mut sancor = provider("sancor", "1708", 1);
        sancor.insurers = vec!["Sancor Seguros".to_string()];
        let popular = provider("popular", "1708", 10);
        let catalog = ProviderCatalog::new(vec![sancor, popular]);

        let query = ProviderQuery::new(Flow::Duplicate).postal_code("1708").insured_by("Sancor");
        assert_eq!(id_of(derive_provider(&catalog, &query)).as_deref(), Some("sancor"));

        // Unknown insurer: preference relaxed, priority decides.
        let query = ProviderQuery::new(Flow::Duplicate).postal_code("1708").insured_by("Mapfre");
        assert_eq!(id_of(derive_provider(&catalog, &query)).as_deref(), Some("popular"));

        // Private clients ignore insurers entirely.
        let query = ProviderQuery {
            insurer: Some("Sancor".to_string()),
            ..ProviderQuery::new(Flow::Duplicate).postal_code("1708").role(Role::Private)
        };
        assert_eq!(id_of(derive_provider(&catalog, &query)).as_deref(), Some("popular"));
    }

    #[test]
    fn test_empty_catalog_never_matches() {
        let catalog = ProviderCatalog::empty();
        let query = ProviderQuery::new(Flow::Duplicate)
            .postal_code("1708")
            .coordinates(Coordinates::new(-34.6, -58.6));
        assert!(derive_provider(&catalog, &query).is_none());
        assert!(derive_provider(&catalog, &ProviderQuery::new(Flow::NewKey)).is_none());
    }

    fn arb_provider() -> impl Strategy<Value = Provider> {
        (
            "[a-z]{1,6}",
            prop_oneof!["[0-9]{4}", "[0-9]{0,3}", Just(String::new())],
            -5i32..5,
            proptest::option::of((-40.0f64..-20.0, -70.0f64..-50.0)),
            proptest::collection::vec(
                prop_oneof![
                    Just(Flow::Duplicate),
                    Just(Flow::ShellReplacement),
                    Just(Flow::NewKey)
                ],
                0..3,
            ),
        )
            .prop_map(|(id, postal_code, priority, location, services)| Provider {
                name: id.clone(),
                address: String::new(),
                id,
                postal_code,
                latitude: location.map(|(lat, _)| lat),
                longitude: location.map(|(_, lon)| lon),
                services,
                insurers: Vec::new(),
                priority,
            })
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(
            providers in proptest::collection::vec(arb_provider(), 0..12),
            postal_code in proptest::option::of("[0-9]{4}"),
            located in any::<bool>(),
        ) {
            let catalog = ProviderCatalog::new(providers);
            let mut query = ProviderQuery::new(Flow::Duplicate);
            query.postal_code = postal_code;
            if located {
                query.coordinates = Some(Coordinates::new(-34.6, -58.6));
            }
            let first = derive_provider(&catalog, &query);
            let second = derive_provider(&catalog.clone(), &query.clone());
            prop_assert_eq!(first, second);
        }
    }
}
