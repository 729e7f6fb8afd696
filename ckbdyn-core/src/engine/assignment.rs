//! Node-to-community assignment solver.
//!
//! Runs after every timestep's events and fills each stable community up to
//! its desired size while tracking every node's desired membership count as
//! closely as possible. The solver works in strictly ordered phases:
//!
//! 1. **Supply relaxation** — while fewer member slots are open than nodes
//!    want memberships, free slots by taking overassigned nodes out of
//!    communities that tolerate a removal.
//! 2. **Greedy assignment** — nodes grouped by desired membership count
//!    (largest first) scan the open communities grouped by desired size and
//!    claim slots; exhausted communities are compacted away lazily.
//! 3. **Overassignment rounds** — while slots remain, a global
//!    overassignment factor grows and nodes are stochastically rounded up to
//!    scaled targets until every slot is claimed.
//! 4. **Randomised rebalancing** — pairs of claims are resampled and
//!    swapped whenever that strictly lowers the larger relative
//!    overassignment of the pair.
//! 5. **Materialisation** — the surviving claims become real memberships,
//!    which is where edge events are emitted.

use rand::Rng;
use tracing::{debug, warn};

use crate::{error::Result, sampling::IndexedSet};

use super::{CkbDynamic, CommunityId, community::CommunityState};

/// A claim is keyed by the node's slot in the per-run ordering, not by the
/// node id, so the rebalancing phase can address its bookkeeping arrays
/// directly.
type Claim = (usize, CommunityId);

impl CkbDynamic {
    /// Reconciles community sizes with desired per-node membership counts.
    ///
    /// Postcondition: every stable community holds exactly `desired_size`
    /// members.
    pub(crate) fn assign_nodes_to_communities(&mut self) -> Result<()> {
        self.ensure_running()?;
        let min_size = self.min_community_size();

        let mut communities_missing: Vec<CommunityId> = Vec::new();
        let mut total_missing_members = 0usize;
        for &community in self.community_ids.as_slice() {
            let com = self.community(community);
            if com.state != CommunityState::Stable {
                continue;
            }
            debug_assert!(com.desired_size >= min_size);
            debug_assert!(com.nodes.len() <= com.desired_size);
            if com.nodes.len() < com.desired_size {
                communities_missing.push(community);
                total_missing_members += com.desired_size - com.nodes.len();
            }
        }
        if total_missing_members == 0 {
            return Ok(());
        }

        let mut total_missing_memberships = 0usize;
        for &node in self.nodes_alive.as_slice() {
            let desired = self.desired_memberships[node];
            let actual = self.node_communities[node].len();
            if desired > actual {
                total_missing_memberships += desired - actual;
            }
        }
        debug!(
            missing_members = total_missing_members,
            missing_memberships = total_missing_memberships,
            "collected assignment deficits"
        );

        // Phase 1: free member slots until supply meets demand.
        if total_missing_members < total_missing_memberships {
            self.ensure_running()?;
            let mut index = 0;
            while index < self.overassigned_nodes.len()
                && total_missing_members < total_missing_memberships
            {
                let node = self.overassigned_nodes.at(index);
                debug_assert!(self.node_communities[node].len() > self.desired_memberships[node]);

                let mut reduced_to_desired = false;
                let mut position = 0;
                while position < self.node_communities[node].len()
                    && total_missing_members < total_missing_memberships
                {
                    let community = self.node_communities[node].at(position);
                    let (removable, had_no_deficit) = {
                        let com = self.community(community);
                        (
                            com.state == CommunityState::Stable && com.can_remove_node(min_size),
                            com.desired_size <= com.nodes.len(),
                        )
                    };
                    if removable {
                        if had_no_deficit {
                            communities_missing.push(community);
                        }
                        self.remove_node_from_community(node, community);
                        total_missing_members += 1;
                        if self.node_communities[node].len() == self.desired_memberships[node] {
                            reduced_to_desired = true;
                            break;
                        }
                        // The removed entry's slot now holds another
                        // community; sample the same position again.
                    } else {
                        position += 1;
                    }
                }
                if !reduced_to_desired {
                    index += 1;
                }
            }
            debug!(
                missing_members = total_missing_members,
                "relaxed overassignments"
            );
        }

        // Phase 2 setup: counting sorts. Communities ascend by desired size;
        // nodes descend by desired membership count so the hungriest nodes
        // meet the largest communities first.
        self.ensure_running()?;
        let mut open_communities: Vec<(CommunityId, usize)> = {
            let mut counts: Vec<usize> = Vec::new();
            for &community in &communities_missing {
                let desired = self.community(community).desired_size;
                if desired >= counts.len() {
                    counts.resize(desired + 1, 0);
                }
                counts[desired] += 1;
            }
            let mut sum = 0;
            for slot in counts.iter_mut() {
                let count = *slot;
                *slot = sum;
                sum += count;
            }
            let mut ordered = vec![(CommunityId::new(0), 0usize); sum];
            for &community in &communities_missing {
                let com = self.community(community);
                ordered[counts[com.desired_size]] = (community, com.desired_size - com.nodes.len());
                counts[com.desired_size] += 1;
            }
            ordered
        };

        let nodes_by_desired: Vec<usize> = {
            let mut counts: Vec<usize> = Vec::new();
            for &node in self.nodes_alive.as_slice() {
                let desired = self.desired_memberships[node];
                if desired >= counts.len() {
                    counts.resize(desired + 1, 0);
                }
                counts[desired] += 1;
            }
            let mut sum = 0;
            for slot in counts.iter_mut().rev() {
                let count = *slot;
                *slot = sum;
                sum += count;
            }
            let mut ordered = vec![0usize; self.nodes_alive.len()];
            for &node in self.nodes_alive.as_slice() {
                let desired = self.desired_memberships[node];
                ordered[counts[desired]] = node;
                counts[desired] += 1;
            }
            ordered
        };

        let mut claims: IndexedSet<Claim> = IndexedSet::new();
        let mut claims_per_slot = vec![0usize; nodes_by_desired.len()];
        let mut additional_wanted = vec![0usize; nodes_by_desired.len()];
        let mut slots_wanting: Vec<usize> = Vec::new();
        let mut still_missing = total_missing_members;

        // Phase 2: greedy assignment of nodes that actually want members.
        for slot in 0..nodes_by_desired.len() {
            let node = nodes_by_desired[slot];
            let desired = self.desired_memberships[node];
            let actual = self.node_communities[node].len();
            if desired > actual {
                greedily_assign(
                    self,
                    &mut open_communities,
                    &mut claims,
                    &mut claims_per_slot,
                    &mut still_missing,
                    &mut additional_wanted,
                    &mut slots_wanting,
                    slot,
                    node,
                    desired - actual,
                    false,
                );
            }
        }
        debug!(
            still_missing,
            claims = claims.len(),
            "finished greedy assignment"
        );

        // Phase 3: grow a global overassignment factor until every open
        // slot is claimed. Nodes that already failed to find a community in
        // phase 2 are skipped; every candidate pair has been tried for them.
        let mut over_assignment = 0.0f64;
        let mut rounds = 0usize;
        while still_missing > 0 {
            self.ensure_running()?;
            if nodes_by_desired.is_empty() || self.sum_desired_memberships == 0 {
                warn!(still_missing, "no nodes left to absorb open member slots");
                break;
            }
            rounds += 1;
            over_assignment += f64::max(
                0.01,
                still_missing as f64 / self.sum_desired_memberships as f64,
            );
            for slot in 0..nodes_by_desired.len() {
                let node = nodes_by_desired[slot];
                if additional_wanted[slot] > 0 {
                    continue;
                }
                let scaled = self.desired_memberships[node] as f64 * (1.0 + over_assignment);
                let mut rounded = scaled as usize;
                if self.rng.gen::<f64>() < scaled - rounded as f64 {
                    rounded += 1;
                }
                let holding = self.node_communities[node].len() + claims_per_slot[slot];
                if rounded > holding {
                    greedily_assign(
                        self,
                        &mut open_communities,
                        &mut claims,
                        &mut claims_per_slot,
                        &mut still_missing,
                        &mut additional_wanted,
                        &mut slots_wanting,
                        slot,
                        node,
                        rounded - holding,
                        true,
                    );
                }
                if still_missing == 0 {
                    break;
                }
            }
        }
        debug!(rounds, over_assignment, "finished overassignment rounds");

        // Phase 4: randomised rebalancing of claims.
        self.ensure_running()?;
        self.rebalance_claims(
            &nodes_by_desired,
            &mut claims,
            &mut claims_per_slot,
            &mut additional_wanted,
            &mut slots_wanting,
            total_missing_members,
        );

        // Phase 5: materialise the claims; this is where edges appear.
        self.ensure_running()?;
        let materialised: Vec<Claim> = claims.as_slice().to_vec();
        debug!(claims = materialised.len(), "materialising assignments");
        for (slot, community) in materialised {
            let node = nodes_by_desired[slot];
            self.add_node_to_community(node, community);
            debug_assert!(
                over_assignment > 0.0
                    || self.node_communities[node].len() <= self.desired_memberships[node]
            );
        }

        #[cfg(debug_assertions)]
        for &community in self.community_ids.as_slice() {
            let com = self.community(community);
            if com.state == CommunityState::Stable {
                debug_assert_eq!(com.nodes.len(), com.desired_size);
                debug_assert!(com.desired_size >= min_size);
            }
        }

        Ok(())
    }

    /// Runs `10 · (claims + wanting slots)` improvement rounds, each drawing
    /// one existing claim and one partner (a second claim or a node still
    /// wanting memberships) and applying whichever reassignment strictly
    /// lowers the pair's larger relative overassignment.
    fn rebalance_claims(
        &mut self,
        nodes_by_desired: &[usize],
        claims: &mut IndexedSet<Claim>,
        claims_per_slot: &mut [usize],
        additional_wanted: &mut [usize],
        slots_wanting: &mut Vec<usize>,
        total_missing_members: usize,
    ) {
        let claim_count = claims.len();
        debug_assert_eq!(claim_count, total_missing_members);
        if claim_count == 0 {
            return;
        }

        let rounds = 10 * (total_missing_members + slots_wanting.len());
        for _ in 0..rounds {
            debug_assert_eq!(claims.len(), claim_count);

            let (slot0, com0) = claims.at(self.draw_index(claim_count));

            // The partner may be a claim or a slot still wanting
            // memberships; stale wanting entries are deleted lazily.
            let mut second_index = self.draw_index(claim_count + slots_wanting.len());
            let (slot1, com1) = loop {
                if second_index < claim_count {
                    let (slot, community) = claims.at(second_index);
                    break (slot, Some(community));
                }
                let candidate = slots_wanting[second_index - claim_count];
                if additional_wanted[candidate] == 0 {
                    slots_wanting.swap_remove(second_index - claim_count);
                } else {
                    break (candidate, None);
                }
                second_index = self.draw_index(claim_count + slots_wanting.len());
            };

            if slot0 == slot1 || Some(com0) == com1 {
                continue;
            }

            let node0 = nodes_by_desired[slot0];
            let node1 = nodes_by_desired[slot1];
            let holding0 = claims_per_slot[slot0] + self.node_communities[node0].len();
            let holding1 = claims_per_slot[slot1] + self.node_communities[node1].len();
            let desired0 = self.desired_memberships[node0];
            let desired1 = self.desired_memberships[node1];
            let inverted0 = 1.0 / desired0 as f64;
            let inverted1 = 1.0 / desired1 as f64;
            let over0 = holding0 as f64 * inverted0;
            let over1 = holding1 as f64 * inverted1;
            debug_assert!(holding0 > 0);

            let Some(com1) = com1 else {
                debug_assert!(over1 < 1.0);
                // Hand the community over iff node 0 is better off even
                // after losing it.
                if over0 - inverted0 >= over1 {
                    if self.community(com0).has_node(node1) {
                        continue;
                    }
                    if claims.insert((slot1, com0)) {
                        claims.remove((slot0, com0));
                        claims_per_slot[slot0] -= 1;
                        claims_per_slot[slot1] += 1;
                        additional_wanted[slot1] -= 1;
                        if desired0 + 1 <= holding0 {
                            slots_wanting.swap_remove(second_index - claim_count);
                        } else {
                            additional_wanted[slot0] += 1;
                            slots_wanting[second_index - claim_count] = slot0;
                        }
                    }
                }
                continue;
            };

            debug_assert!(holding1 > 0);
            // Three options: give com1 to node 0, give com0 to node 1, or
            // swap both. A handover is taken when it strictly lowers the
            // larger relative overassignment.
            if (holding0 < desired0 && over0 < over1 - inverted1)
                || (holding0 >= desired0 && over0 + inverted0 < over1)
            {
                replace_claim(
                    self,
                    claims,
                    claims_per_slot,
                    additional_wanted,
                    slots_wanting,
                    (slot1, com1, holding1, desired1),
                    (slot0, node0),
                );
            } else if (holding1 < desired1 && over1 < over0 - inverted0)
                || (holding1 >= desired1 && over1 + inverted1 < over0)
            {
                replace_claim(
                    self,
                    claims,
                    claims_per_slot,
                    additional_wanted,
                    slots_wanting,
                    (slot0, com0, holding0, desired0),
                    (slot1, node1),
                );
            } else {
                if self.community(com0).has_node(node1) || self.community(com1).has_node(node0) {
                    continue;
                }
                if claims.contains((slot0, com1)) {
                    continue;
                }
                if claims.insert((slot1, com0)) {
                    claims.remove((slot0, com0));
                    claims.remove((slot1, com1));
                    claims.insert((slot0, com1));
                }
            }
        }
    }
}

/// Scans the open communities from the largest-desired end and claims up to
/// `wanted` member slots for `node`. Communities whose deficit reaches zero
/// are swept out in a linear compaction pass. When the scan comes up short
/// outside overassignment mode, the shortfall is recorded so later phases
/// can offer the node spare slots.
#[allow(clippy::too_many_arguments)]
fn greedily_assign(
    engine: &CkbDynamic,
    open_communities: &mut Vec<(CommunityId, usize)>,
    claims: &mut IndexedSet<Claim>,
    claims_per_slot: &mut [usize],
    still_missing: &mut usize,
    additional_wanted: &mut [usize],
    slots_wanting: &mut Vec<usize>,
    slot: usize,
    node: usize,
    wanted: usize,
    over_assignment: bool,
) {
    let mut to_find = wanted;
    let mut first_exhausted = None;
    for offset in 0..open_communities.len() {
        let index = open_communities.len() - offset - 1;
        let (community, missing) = &mut open_communities[index];
        if *missing > 0
            && !engine.community(*community).has_node(node)
            && claims.insert((slot, *community))
        {
            *missing -= 1;
            *still_missing -= 1;
            to_find -= 1;
            claims_per_slot[slot] += 1;
        }
        if *missing == 0 {
            first_exhausted = Some(index);
        }
        if to_find == 0 {
            break;
        }
    }

    // Compact exhausted entries so later scans never revisit them; only the
    // suffix touched above is rewritten.
    if let Some(start) = first_exhausted {
        let mut write = start;
        for read in start..open_communities.len() {
            if open_communities[read].1 > 0 {
                open_communities[write] = open_communities[read];
                write += 1;
            }
        }
        open_communities.truncate(write);
    }

    if !over_assignment {
        additional_wanted[slot] = to_find;
        for _ in 0..to_find {
            slots_wanting.push(slot);
        }
    }

    debug_assert!(
        over_assignment
            || claims_per_slot[slot] + engine.node_communities[node].len()
                <= engine.desired_memberships[node]
    );
}

/// Moves an existing claim from one slot to another, keeping the wanting
/// bookkeeping consistent. Returns `false` when the move would duplicate a
/// membership or an existing claim.
fn replace_claim(
    engine: &CkbDynamic,
    claims: &mut IndexedSet<Claim>,
    claims_per_slot: &mut [usize],
    additional_wanted: &mut [usize],
    slots_wanting: &mut Vec<usize>,
    old: (usize, CommunityId, usize, usize),
    new: (usize, usize),
) -> bool {
    let (old_slot, community, old_holding, old_desired) = old;
    let (new_slot, new_node) = new;
    if engine.community(community).has_node(new_node) {
        return false;
    }
    if !claims.insert((new_slot, community)) {
        return false;
    }
    claims.remove((old_slot, community));
    claims_per_slot[old_slot] -= 1;
    claims_per_slot[new_slot] += 1;
    if additional_wanted[new_slot] > 0 {
        // Deletion from the wanting list happens lazily once this hits zero.
        additional_wanted[new_slot] -= 1;
    }
    if old_holding - 1 < old_desired {
        additional_wanted[old_slot] += 1;
        slots_wanting.push(old_slot);
    }
    true
}
