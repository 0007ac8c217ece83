//! Minimap clustering.
//!
//! Entities of one kind are grouped with others of the same owner (and, for
//! structures, the same category) when they lie within the zoom-derived radius
//! `R` of every member already in the group. The first unclaimed entity in input
//! order seeds each group and its hex is the cluster center.
//!
//! Two candidate generators are available. Brute force scans every later entity.
//! Bucketed hashes entities into `R`-sized cells and only scans the seed's cell
//! and its eight neighbours; a hex within distance `R` never differs by more than
//! `R` in either offset coordinate, so both produce the same clusters.

use std::collections::HashMap;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use worldmap_schema::{MinimapMarker, StructureKind};

use crate::{
    config::{ClusterConfig, ClusterStrategies},
    hex::HexCoord,
    records::{ClusterSubject, EntityKind, OwnerId},
    registry::EntityRegistry,
    world::WorldState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategy {
    #[default]
    Bucketed,
    BruteForce,
}

type GroupKey = (Option<OwnerId>, Option<StructureKind>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterInput {
    pub hex: HexCoord,
    pub owner: Option<OwnerId>,
    pub category: Option<StructureKind>,
}

impl ClusterInput {
    pub fn new(hex: HexCoord, owner: Option<OwnerId>, category: Option<StructureKind>) -> Self {
        Self {
            hex,
            owner,
            category,
        }
    }

    fn group(&self) -> GroupKey {
        (self.owner, self.category)
    }
}

/// Radius for a zoom ratio in `[0, 1]`, interpolated between `min` and `max`.
pub fn cluster_radius(min: u32, max: u32, zoom_ratio: f32) -> u32 {
    let ratio = zoom_ratio.clamp(0.0, 1.0);
    let radius = (min as f32 + ratio * (max as f32 - min as f32)).round();
    (radius.max(0.0) as u32).clamp(min.min(max), max.max(min))
}

/// Groups `inputs` and returns each cluster as a list of input indices, seed first.
pub fn cluster_indices(
    inputs: &[ClusterInput],
    radius: u32,
    strategy: ClusterStrategy,
) -> Vec<Vec<usize>> {
    match strategy {
        ClusterStrategy::Bucketed => cluster_bucketed(inputs, radius),
        ClusterStrategy::BruteForce => cluster_brute_force(inputs, radius),
    }
}

pub fn cluster_brute_force(inputs: &[ClusterInput], radius: u32) -> Vec<Vec<usize>> {
    let mut claimed = vec![false; inputs.len()];
    let mut clusters = Vec::new();
    for seed in 0..inputs.len() {
        if claimed[seed] {
            continue;
        }
        clusters.push(grow(inputs, radius, seed, seed + 1..inputs.len(), &mut claimed));
    }
    clusters
}

pub fn cluster_bucketed(inputs: &[ClusterInput], radius: u32) -> Vec<Vec<usize>> {
    let cell = i32::try_from(radius.max(1)).unwrap_or(i32::MAX);
    let bucket_of = |hex: HexCoord| (hex.col.div_euclid(cell), hex.row.div_euclid(cell));

    let mut buckets: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
    for (idx, input) in inputs.iter().enumerate() {
        buckets.entry(bucket_of(input.hex)).or_default().push(idx);
    }

    let mut claimed = vec![false; inputs.len()];
    let mut clusters = Vec::new();
    let mut candidates = Vec::new();
    for seed in 0..inputs.len() {
        if claimed[seed] {
            continue;
        }
        let (bx, by) = bucket_of(inputs[seed].hex);
        candidates.clear();
        for dx in -1..=1 {
            for dy in -1..=1 {
                let key = (bx.saturating_add(dx), by.saturating_add(dy));
                if let Some(indices) = buckets.get(&key) {
                    candidates.extend(indices.iter().copied().filter(|&idx| idx > seed));
                }
            }
        }
        candidates.sort_unstable();
        clusters.push(grow(
            inputs,
            radius,
            seed,
            candidates.iter().copied(),
            &mut claimed,
        ));
    }
    clusters
}

fn grow(
    inputs: &[ClusterInput],
    radius: u32,
    seed: usize,
    candidates: impl IntoIterator<Item = usize>,
    claimed: &mut [bool],
) -> Vec<usize> {
    claimed[seed] = true;
    let group = inputs[seed].group();
    let mut members = vec![seed];
    for idx in candidates {
        if claimed[idx] || inputs[idx].group() != group {
            continue;
        }
        let hex = inputs[idx].hex;
        if members
            .iter()
            .all(|&member| inputs[member].hex.distance(hex) <= radius)
        {
            claimed[idx] = true;
            members.push(idx);
        }
    }
    members
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    pub kind: EntityKind,
    pub center: HexCoord,
    pub members: Vec<HexCoord>,
    pub owner: Option<OwnerId>,
    pub category: Option<StructureKind>,
    pub is_mine: bool,
}

impl ClusterRecord {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn marker(&self) -> MinimapMarker {
        MinimapMarker {
            kind: self.kind,
            center_col: self.center.col,
            center_row: self.center.row,
            is_mine: self.is_mine,
            category: self.category,
            owner: self.owner.map(|owner| owner.0),
            member_count: u32::try_from(self.members.len()).unwrap_or(u32::MAX),
        }
    }
}

/// Clusters every record of one registry.
pub fn cluster_registry<T: ClusterSubject>(
    registry: &EntityRegistry<T>,
    radius: u32,
    strategy: ClusterStrategy,
    local_player: Option<OwnerId>,
) -> Vec<ClusterRecord> {
    let inputs: Vec<ClusterInput> = registry
        .iter()
        .map(|record| ClusterInput::new(record.hex, record.data.owner(), record.data.category()))
        .collect();
    cluster_indices(&inputs, radius, strategy)
        .into_iter()
        .map(|members| {
            let seed = inputs[members[0]];
            ClusterRecord {
                kind: T::KIND,
                center: seed.hex,
                members: members.iter().map(|&idx| inputs[idx].hex).collect(),
                owner: seed.owner,
                category: seed.category,
                is_mine: seed.owner.is_some() && seed.owner == local_player,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclusterReason {
    Initial,
    RadiusChanged,
    ZoomMoved,
    Forced,
    Sampled,
}

/// Decides when the cached clusters are recomputed.
///
/// Clusters are allowed to go stale: between zoom changes only a random fraction
/// of ticks recompute, which eventually picks up entity movement.
#[derive(Debug, Clone)]
pub struct ReclusterPolicy {
    min_radius: u32,
    max_radius: u32,
    hysteresis: f32,
    sample_probability: f64,
    rng: SmallRng,
    radius: u32,
    last_ratio: Option<f32>,
    forced: bool,
}

impl ReclusterPolicy {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            min_radius: config.min_radius,
            max_radius: config.max_radius,
            hysteresis: config.hysteresis,
            sample_probability: config.sample_probability.clamp(0.0, 1.0),
            rng: SmallRng::seed_from_u64(config.seed),
            radius: config.min_radius,
            last_ratio: None,
            forced: false,
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn force(&mut self) {
        self.forced = true;
    }

    pub fn evaluate(&mut self, zoom_ratio: f32) -> Option<ReclusterReason> {
        let radius = cluster_radius(self.min_radius, self.max_radius, zoom_ratio);
        let reason = match self.last_ratio {
            None => Some(ReclusterReason::Initial),
            Some(_) if radius != self.radius => Some(ReclusterReason::RadiusChanged),
            Some(last) if (zoom_ratio - last).abs() > self.hysteresis => {
                Some(ReclusterReason::ZoomMoved)
            }
            Some(_) if self.forced => Some(ReclusterReason::Forced),
            Some(_) => self
                .rng
                .gen_bool(self.sample_probability)
                .then_some(ReclusterReason::Sampled),
        };
        if reason.is_some() {
            self.radius = radius;
            self.last_ratio = Some(zoom_ratio);
            self.forced = false;
        }
        reason
    }
}

pub struct ClusterEngine {
    policy: ReclusterPolicy,
    strategies: ClusterStrategies,
    local_player: Option<OwnerId>,
    clusters: Vec<ClusterRecord>,
}

impl ClusterEngine {
    pub fn new(config: &ClusterConfig, local_player: Option<OwnerId>) -> Self {
        Self {
            policy: ReclusterPolicy::new(config),
            strategies: config.strategies.clone(),
            local_player,
            clusters: Vec::new(),
        }
    }

    pub fn radius(&self) -> u32 {
        self.policy.radius()
    }

    pub fn clusters(&self) -> &[ClusterRecord] {
        &self.clusters
    }

    pub fn markers(&self) -> Vec<MinimapMarker> {
        self.clusters.iter().map(ClusterRecord::marker).collect()
    }

    pub fn mark_dirty(&mut self) {
        self.policy.force();
    }

    pub fn reset(&mut self) {
        self.clusters.clear();
        self.policy.force();
    }

    /// Recomputes if the policy asks for it and reports why.
    pub fn tick(&mut self, world: &WorldState, zoom_ratio: f32) -> Option<ReclusterReason> {
        let reason = self.policy.evaluate(zoom_ratio)?;
        self.recompute(world);
        Some(reason)
    }

    pub fn recompute(&mut self, world: &WorldState) {
        let radius = self.policy.radius();
        let local = self.local_player;
        let strategies = &self.strategies;
        let mut clusters = cluster_registry(
            &world.structures,
            radius,
            strategies.for_kind(EntityKind::Structure),
            local,
        );
        clusters.extend(cluster_registry(
            &world.armies,
            radius,
            strategies.for_kind(EntityKind::Army),
            local,
        ));
        clusters.extend(cluster_registry(
            &world.quests,
            radius,
            strategies.for_kind(EntityKind::Quest),
            local,
        ));
        clusters.extend(cluster_registry(
            &world.chests,
            radius,
            strategies.for_kind(EntityKind::Chest),
            local,
        ));
        self.clusters = clusters;
    }
}
