use crate::config::SelectorConfig;
use crate::error::CenterlineError;
use crate::geometry_utils::{SegmentIndex, longest_part, merge_lines, snap_and_merge};
use ahash::{HashMap, HashMapExt};
use geo::{Coord, Euclidean, Length, LineString, MultiLineString};
use log::debug;
use ordered_float::OrderedFloat;

/// Outcome of station-scored component selection.
#[derive(Debug, Clone)]
pub struct MainlineSelection {
    /// Merged geometry of the chosen components
    pub geometry: MultiLineString,
    /// Longest part of `geometry`
    pub representative: LineString,
    /// Indices of the chosen components, in pick order
    pub chosen: Vec<usize>,
    pub stations_hit: usize,
    pub stations_total: usize,
    pub hit_ratio: f64,
}

fn endpoint_key(c: &Coord) -> (OrderedFloat<f64>, OrderedFloat<f64>) {
    (OrderedFloat(c.x), OrderedFloat(c.y))
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Group merged chains into connected components (chains sharing an endpoint).
///
/// Components come out ordered by their first chain.
pub fn connected_components(chains: &MultiLineString) -> Vec<MultiLineString> {
    let n = chains.0.len();
    let mut parent: Vec<usize> = (0..n).collect();
    let mut owner: HashMap<(OrderedFloat<f64>, OrderedFloat<f64>), usize> = HashMap::new();

    for (i, chain) in chains.0.iter().enumerate() {
        for end in [chain.0.first(), chain.0.last()].into_iter().flatten() {
            match owner.get(&endpoint_key(end)) {
                Some(&j) => {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[ri.max(rj)] = ri.min(rj);
                    }
                }
                None => {
                    owner.insert(endpoint_key(end), i);
                }
            }
        }
    }

    let mut slot: HashMap<usize, usize> = HashMap::new();
    let mut components: Vec<Vec<LineString>> = Vec::new();
    for (i, chain) in chains.0.iter().enumerate() {
        let root = find(&mut parent, i);
        let k = *slot.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[k].push(chain.clone());
    }
    components.into_iter().map(MultiLineString::new).collect()
}

/// Snap, merge and split a raw line network into its connected components.
pub fn network_components(lines: &[LineString], snap_tolerance_m: f64) -> Vec<MultiLineString> {
    connected_components(&snap_and_merge(lines, snap_tolerance_m))
}

/// Greedily pick the components that cover the most stations.
///
/// Starts from the component with the most hits (then the longest), and keeps
/// adding the one with the largest marginal gain until the target ratio or the
/// component budget is reached, or nothing adds coverage. Without stations the
/// longest component is returned with a ratio of 0.
pub fn select_mainline(
    components: &[MultiLineString],
    stations: &[Coord],
    config: &SelectorConfig,
) -> Result<MainlineSelection, CenterlineError> {
    if components.is_empty() {
        return Err(CenterlineError::ChooseFailed);
    }
    let lengths: Vec<f64> = components.iter().map(|c| Euclidean.length(c)).collect();
    let total = stations.len();

    let masks = coverage_masks(components, stations, config.station_hit_m);

    let chosen = if total == 0 {
        let longest = (0..components.len())
            .max_by_key(|&i| OrderedFloat(lengths[i]))
            .ok_or(CenterlineError::ChooseFailed)?;
        vec![longest]
    } else {
        greedy_cover(&masks, &lengths, config)?
    };

    let stations_hit = (0..total)
        .filter(|&s| chosen.iter().any(|&c| masks[c][s]))
        .count();
    let hit_ratio = if total == 0 {
        0.0
    } else {
        stations_hit as f64 / total as f64
    };

    let picked: Vec<LineString> = chosen
        .iter()
        .flat_map(|&i| components[i].0.iter().cloned())
        .collect();
    let geometry = merge_lines(&picked);
    let representative = longest_part(&geometry)
        .cloned()
        .ok_or(CenterlineError::ChooseFailed)?;

    debug!(
        "Chose components {:?}: {}/{} stations ({:.3})",
        chosen, stations_hit, total, hit_ratio
    );

    Ok(MainlineSelection {
        geometry,
        representative,
        chosen,
        stations_hit,
        stations_total: total,
        hit_ratio,
    })
}

/// `masks[component][station]`: station lies within `hit_m` of the component.
fn coverage_masks(components: &[MultiLineString], stations: &[Coord], hit_m: f64) -> Vec<Vec<bool>> {
    components
        .iter()
        .map(|c| {
            let index = SegmentIndex::from_curves(&c.0);
            stations
                .iter()
                .map(|&p| index.distance_to_point(p) <= hit_m)
                .collect()
        })
        .collect()
}

fn greedy_cover(
    masks: &[Vec<bool>],
    lengths: &[f64],
    config: &SelectorConfig,
) -> Result<Vec<usize>, CenterlineError> {
    let total = masks.first().map_or(0, Vec::len);
    let hits = |mask: &[bool]| mask.iter().filter(|&&h| h).count();

    let first = (0..masks.len())
        .max_by_key(|&i| (hits(&masks[i]), OrderedFloat(lengths[i])))
        .ok_or(CenterlineError::ChooseFailed)?;
    let mut chosen = vec![first];
    let mut covered = masks[first].clone();

    while chosen.len() < config.max_components.max(1) {
        let covered_now = hits(&covered);
        if covered_now as f64 / total as f64 >= config.target_ratio {
            break;
        }
        let mut best: Option<(usize, usize)> = None;
        for j in 0..masks.len() {
            if chosen.contains(&j) {
                continue;
            }
            let gain = (0..total).filter(|&s| !covered[s] && masks[j][s]).count();
            if gain > best.map_or(0, |(_, g)| g) {
                best = Some((j, gain));
            }
        }
        let Some((j, _)) = best else {
            break;
        };
        chosen.push(j);
        for s in 0..total {
            covered[s] |= masks[j][s];
        }
    }
    Ok(chosen)
}
