//! Static game data consumed by bounty generation: factions, built-in
//! criminal templates and the jump graph of star systems.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CATALOG_DATA: &str = include_str!("../assets/catalog.json");

/// Errors raised when catalog data is internally inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("system '{0}' is defined more than once")]
    DuplicateSystem(String),
    #[error("system '{from}' links to unknown system '{to}'")]
    DanglingLink { from: String, to: String },
    #[error("criminal '{name}' belongs to unknown faction '{faction}'")]
    UnknownCriminalFaction { name: String, faction: String },
    #[error("lane cost from '{from}' to '{to}' must be positive")]
    InvalidLaneCost { from: String, to: String },
}

/// A star system in the jump graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSystem {
    pub name: String,
    #[serde(default)]
    pub coordinates: Option<[f64; 2]>,
    #[serde(default)]
    pub has_jump_gate: bool,
    #[serde(default)]
    pub neighbours: Vec<String>,
    /// Explicit traversal costs; lanes without an entry fall back to the
    /// straight-line distance, or 1 when either end lacks coordinates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lane_costs: BTreeMap<String, f64>,
}

impl SolarSystem {
    /// Whether bounties may start or end their route here.
    #[must_use]
    pub const fn has_jump_gate(&self) -> bool {
        self.has_jump_gate
    }
}

/// Read-only jump graph. System order is the order systems were defined in,
/// which is also the tie-break order for route planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SolarSystem>", into = "Vec<SolarSystem>")]
pub struct SystemGraph {
    systems: Vec<SolarSystem>,
    index: HashMap<String, usize>,
    lookup: HashMap<String, usize>,
}

impl TryFrom<Vec<SolarSystem>> for SystemGraph {
    type Error = CatalogError;

    fn try_from(systems: Vec<SolarSystem>) -> Result<Self, Self::Error> {
        Self::new(systems)
    }
}

impl From<SystemGraph> for Vec<SolarSystem> {
    fn from(graph: SystemGraph) -> Self {
        graph.systems
    }
}

impl SystemGraph {
    /// Build a graph, checking that names are unique and every lane points at
    /// a defined system.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] describing the first inconsistency found.
    pub fn new(systems: Vec<SolarSystem>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(systems.len());
        let mut lookup = HashMap::with_capacity(systems.len());
        for (position, system) in systems.iter().enumerate() {
            if index.insert(system.name.clone(), position).is_some() {
                return Err(CatalogError::DuplicateSystem(system.name.clone()));
            }
            lookup.insert(system.name.to_lowercase(), position);
        }
        for system in &systems {
            for to in &system.neighbours {
                if !index.contains_key(to) {
                    return Err(CatalogError::DanglingLink {
                        from: system.name.clone(),
                        to: to.clone(),
                    });
                }
            }
            if let Some((to, _)) = system
                .lane_costs
                .iter()
                .find(|(_, cost)| !cost.is_finite() || **cost <= 0.0)
            {
                return Err(CatalogError::InvalidLaneCost {
                    from: system.name.clone(),
                    to: to.clone(),
                });
            }
        }
        Ok(Self {
            systems,
            index,
            lookup,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SolarSystem> {
        self.index.get(name).map(|&position| &self.systems[position])
    }

    /// Canonical spelling of a system name, matched case-insensitively.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.lookup
            .get(&name.trim().to_lowercase())
            .map(|&position| self.systems[position].name.as_str())
    }

    pub fn systems(&self) -> impl Iterator<Item = &SolarSystem> {
        self.systems.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|system| system.name.as_str())
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn at(&self, position: usize) -> &SolarSystem {
        &self.systems[position]
    }

    /// Outgoing lanes of a system as `(neighbour position, cost)`, in
    /// definition order.
    pub(crate) fn lanes(&self, position: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let from = &self.systems[position];
        from.neighbours.iter().filter_map(move |to| {
            let target = self.position(to)?;
            Some((target, self.lane_cost(from, &self.systems[target])))
        })
    }

    fn lane_cost(&self, from: &SolarSystem, to: &SolarSystem) -> f64 {
        from.lane_costs
            .get(&to.name)
            .copied()
            .or_else(|| straight_line(from, to))
            .unwrap_or(1.0)
    }

    /// Straight-line distance between two systems, when both have coordinates.
    #[must_use]
    pub fn distance(&self, a: &str, b: &str) -> Option<f64> {
        straight_line(self.get(a)?, self.get(b)?)
    }

    pub(crate) fn distance_between(&self, a: usize, b: usize) -> Option<f64> {
        straight_line(&self.systems[a], &self.systems[b])
    }

    /// Whether straight-line distance never overestimates the remaining cost,
    /// so it can guide an A* search without losing optimality.
    #[must_use]
    pub fn heuristic_admissible(&self) -> bool {
        self.systems.iter().enumerate().all(|(position, system)| {
            system.coordinates.is_some()
                && self.lanes(position).all(|(target, cost)| {
                    self.distance_between(position, target)
                        .is_some_and(|distance| cost + 1e-9 >= distance)
                })
        })
    }

    /// Systems able to act as a route start or end.
    pub fn gated(&self) -> impl Iterator<Item = &SolarSystem> {
        self.systems.iter().filter(|system| system.has_jump_gate)
    }
}

fn straight_line(a: &SolarSystem, b: &SolarSystem) -> Option<f64> {
    let [ax, ay] = a.coordinates?;
    let [bx, by] = b.coordinates?;
    Some((ax - bx).hypot(ay - by))
}

/// Template for a built-in, reusable criminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriminalTemplate {
    pub name: String,
    pub faction: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub wiki: String,
}

#[derive(Debug, Deserialize)]
struct CatalogData {
    factions: Vec<String>,
    #[serde(default)]
    criminals: Vec<CriminalTemplate>,
    systems: SystemGraph,
}

/// All static data the bounty core reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CatalogData")]
pub struct Catalog {
    factions: Vec<String>,
    criminals: Vec<CriminalTemplate>,
    systems: SystemGraph,
}

impl TryFrom<CatalogData> for Catalog {
    type Error = CatalogError;

    fn try_from(data: CatalogData) -> Result<Self, Self::Error> {
        Self::new(data.factions, data.criminals, data.systems)
    }
}

impl Catalog {
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCriminalFaction`] if a template names a
    /// faction missing from `factions`.
    pub fn new(
        factions: Vec<String>,
        criminals: Vec<CriminalTemplate>,
        systems: SystemGraph,
    ) -> Result<Self, CatalogError> {
        let factions: Vec<String> = factions.into_iter().map(|f| f.to_lowercase()).collect();
        let mut criminals = criminals;
        for criminal in &mut criminals {
            criminal.faction = criminal.faction.to_lowercase();
            if !factions.contains(&criminal.faction) {
                return Err(CatalogError::UnknownCriminalFaction {
                    name: criminal.name.clone(),
                    faction: criminal.faction.clone(),
                });
            }
        }
        Ok(Self {
            factions,
            criminals,
            systems,
        })
    }

    /// Load catalog data from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed or fails validation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Catalog embedded in the crate.
    #[must_use]
    pub fn load_from_static() -> Self {
        Self::from_json(DEFAULT_CATALOG_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn factions(&self) -> &[String] {
        &self.factions
    }

    #[must_use]
    pub fn is_faction(&self, faction: &str) -> bool {
        self.factions.iter().any(|known| known == faction)
    }

    #[must_use]
    pub fn criminals(&self) -> &[CriminalTemplate] {
        &self.criminals
    }

    /// Built-in criminal with this name, matched case-insensitively.
    #[must_use]
    pub fn builtin_criminal(&self, name: &str) -> Option<&CriminalTemplate> {
        let wanted = name.trim().to_lowercase();
        self.criminals
            .iter()
            .find(|criminal| criminal.name.to_lowercase() == wanted)
    }

    pub fn criminals_of<'a>(
        &'a self,
        faction: &'a str,
    ) -> impl Iterator<Item = &'a CriminalTemplate> + 'a {
        self.criminals
            .iter()
            .filter(move |criminal| criminal.faction == faction)
    }

    #[must_use]
    pub const fn systems(&self) -> &SystemGraph {
        &self.systems
    }
}

/// Shared instance of the embedded catalog.
#[must_use]
pub fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(Catalog::load_from_static)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(name: &str, neighbours: &[&str]) -> SolarSystem {
        SolarSystem {
            name: name.to_string(),
            coordinates: None,
            has_jump_gate: false,
            neighbours: neighbours.iter().map(ToString::to_string).collect(),
            lane_costs: BTreeMap::new(),
        }
    }

    #[test]
    fn embedded_catalog_is_populated() {
        let catalog = catalog();
        assert_eq!(catalog.factions().len(), 4);
        assert!(catalog.systems().len() >= 10);
        assert!(catalog.systems().gated().count() >= 2);
        for faction in catalog.factions() {
            assert!(catalog.criminals_of(faction).count() > 0, "{faction}");
        }
        assert!(catalog.systems().heuristic_admissible());
    }

    #[test]
    fn graph_rejects_dangling_lanes_and_duplicates() {
        let dangling = SystemGraph::new(vec![system("A", &["B"])]);
        assert_eq!(
            dangling,
            Err(CatalogError::DanglingLink {
                from: "A".into(),
                to: "B".into()
            })
        );

        let duplicate = SystemGraph::new(vec![system("A", &[]), system("A", &[])]);
        assert_eq!(duplicate, Err(CatalogError::DuplicateSystem("A".into())));
    }

    #[test]
    fn lane_costs_fall_back_to_distance_then_unit() {
        let mut a = system("A", &["B", "C"]);
        a.coordinates = Some([0.0, 0.0]);
        let mut b = system("B", &["A"]);
        b.coordinates = Some([3.0, 4.0]);
        let c = system("C", &["A"]);
        let graph = SystemGraph::new(vec![a, b, c]).unwrap();

        let costs: Vec<(usize, f64)> = graph.lanes(0).collect();
        assert_eq!(costs, vec![(1, 5.0), (2, 1.0)]);
        assert!(!graph.heuristic_admissible());
        assert_eq!(graph.distance("A", "B"), Some(5.0));
        assert_eq!(graph.distance("A", "C"), None);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let graph = SystemGraph::new(vec![system("Pescal Inartan", &[])]).unwrap();
        assert_eq!(graph.resolve("pescal inartan"), Some("Pescal Inartan"));
        assert_eq!(graph.resolve("nowhere"), None);
    }

    #[test]
    fn criminals_must_belong_to_known_faction() {
        let criminal = CriminalTemplate {
            name: "Rogue".into(),
            faction: "Pirates".into(),
            icon: String::new(),
            aliases: Vec::new(),
            wiki: String::new(),
        };
        let result = Catalog::new(vec!["terran".into()], vec![criminal], SystemGraph::default());
        assert!(matches!(
            result,
            Err(CatalogError::UnknownCriminalFaction { .. })
        ));
    }
}
