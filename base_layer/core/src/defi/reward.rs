// Copyright 2020. The Quasar Development Community
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use quasar_common_types::{BlockHash, ForkId};

use crate::{
    consensus::COIN,
    defi::relation::RelationGraph,
    forks::{CoinbaseType, ForkProfile},
    transactions::Destination,
};

const LOG_TARGET: &str = "c::df::fork_reward";

/// Per-section cache bound; old sections are evicted oldest-first.
const MAX_SECTION_CACHE: usize = 20;

/// A computed reward distribution: destination to payout in fixed-point units.
pub type DeFiRewardSet = BTreeMap<Destination, i64>;

struct ForkRewardEntry {
    profile: ForkProfile,
    sections: BTreeMap<BlockHash, DeFiRewardSet>,
}

/// The reward engine over all registered DeFi forks. Computation only; consumers persist
/// disbursements as ordinary transactions built from the returned maps.
#[derive(Default)]
pub struct DeFiForkReward {
    fork_reward: HashMap<ForkId, ForkRewardEntry>,
}

impl DeFiForkReward {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn exist_fork(&self, fork_id: &ForkId) -> bool {
        self.fork_reward.contains_key(fork_id)
    }

    pub fn add_fork(&mut self, fork_id: ForkId, profile: ForkProfile) {
        self.fork_reward.entry(fork_id).or_insert(ForkRewardEntry {
            profile,
            sections: BTreeMap::new(),
        });
    }

    pub fn get_fork_profile(&self, fork_id: &ForkId) -> Option<&ForkProfile> {
        self.fork_reward.get(fork_id).map(|entry| &entry.profile)
    }

    /// The last block height of the reward cycle preceding `height`, or −1 when `height` falls
    /// before the first reward.
    pub fn prev_reward_height(&self, fork_id: &ForkId, height: i32) -> i32 {
        let profile = match self.get_fork_profile(fork_id) {
            Some(profile) => profile,
            None => return -1,
        };
        let defi = match &profile.defi {
            Some(defi) if !defi.is_null() => defi,
            _ => return -1,
        };
        let mint_height = defi.effective_mint_height(profile.joint_height);
        let reward_cycle = defi.reward_cycle;
        if height >= mint_height && reward_cycle > 0 {
            (height - mint_height) / reward_cycle * reward_cycle + mint_height - 1
        } else {
            -1
        }
    }

    /// Total coinage minted over the reward section ending at `hash`: the interval from the block
    /// after the previous reward height up to and including `hash`, clipped at the mint height.
    /// Returns −1 when the fork is unknown or carries no DeFi profile.
    pub fn get_section_reward(&self, fork_id: &ForkId, hash: &BlockHash) -> i64 {
        let profile = match self.get_fork_profile(fork_id) {
            Some(profile) => profile,
            None => return -1,
        };
        let defi = match &profile.defi {
            Some(defi) if !defi.is_null() => defi,
            _ => return -1,
        };

        let end_height = hash.height() as i32 + 1;
        let mut begin_height = self.prev_reward_height(fork_id, hash.height() as i32) + 1;
        let mint_height = defi.effective_mint_height(profile.joint_height);
        if begin_height < mint_height {
            begin_height = mint_height;
        }

        let mut reward = 0f64;
        while begin_height < end_height {
            let step = match defi.coinbase_type {
                CoinbaseType::Fixed => Self::get_fixed_decay_coinbase(profile, begin_height),
                CoinbaseType::Specific => Self::get_specific_decay_coinbase(profile, begin_height),
            };
            let (coinbase, next_height) = match step {
                Some(step) => step,
                None => {
                    debug!(target: LOG_TARGET, "coinbase schedule failed at height {begin_height}");
                    return -1;
                },
            };
            if next_height > 0 {
                let span = next_height.min(end_height) - begin_height;
                reward += coinbase * span as f64;
                begin_height += span;
            } else {
                break;
            }
        }
        reward as i64
    }

    /// Per-block coinage and the next height at which it changes, for a FIXED schedule: the
    /// supply compounds by a decaying percentage each supply cycle within each decay cycle.
    fn get_fixed_decay_coinbase(profile: &ForkProfile, height: i32) -> Option<(f64, i32)> {
        let defi = profile.defi.as_ref()?;
        let mint_height = defi.effective_mint_height(profile.joint_height);
        if height < mint_height || defi.supply_cycle <= 0 {
            return None;
        }

        let decay_cycle = defi.decay_cycle;
        let supply_cycle = defi.supply_cycle;
        let supply_count = if decay_cycle <= 0 { 0 } else { decay_cycle / supply_cycle };
        let decay_count = if decay_cycle <= 0 { 0 } else { (height - mint_height) / decay_cycle };
        let decay_height = decay_count * decay_cycle + mint_height;
        let cur_supply_count = (height - decay_height) / supply_cycle;

        // supply = amount * (1 + r)^supply_count per completed decay cycle, each cycle with a
        // decayed rate, truncated to whole units between cycles
        let mut supply = profile.amount;
        let mut rate = defi.init_coinbase_percent as f64 / 100.0;
        for i in 0..=decay_count {
            if i < decay_count {
                supply = (supply as f64 * (1.0 + rate).powi(supply_count)) as i64;
                rate = rate * defi.coinbase_decay_percent as f64 / 100.0;
            } else {
                supply = (supply as f64 * (1.0 + rate).powi(cur_supply_count)) as i64;
            }
        }

        let coinbase = supply as f64 * rate / supply_cycle as f64;
        let next_height = (cur_supply_count + 1) * supply_cycle + decay_height;
        Some((coinbase, next_height))
    }

    /// Per-block coinage for a SPECIFIC schedule: an explicit table of percentages per relative
    /// height span; past the last boundary the coinage is zero.
    fn get_specific_decay_coinbase(profile: &ForkProfile, height: i32) -> Option<(f64, i32)> {
        let defi = profile.defi.as_ref()?;
        let mint_height = defi.effective_mint_height(profile.joint_height);
        if height < mint_height || defi.supply_cycle <= 0 {
            return None;
        }

        let supply_cycle = defi.supply_cycle;
        let relative_height = height - mint_height + 1;

        let mut supply = profile.amount;
        let mut cur_increasing = 0u32;
        let mut cur_supply_count = 0;
        let mut last_decay_height = 0;
        for (&boundary, &percent) in &defi.coinbase_percent {
            let rate = percent as f64 / 100.0;
            if relative_height > boundary {
                let count = (boundary - last_decay_height) / supply_cycle;
                supply = (supply as f64 * (1.0 + rate).powi(count)) as i64;
                last_decay_height = boundary;
            } else {
                cur_supply_count = (relative_height - last_decay_height) / supply_cycle;
                supply = (supply as f64 * (1.0 + rate).powi(cur_supply_count)) as i64;
                cur_increasing = percent;
                break;
            }
        }

        if cur_increasing == 0 {
            return Some((0.0, -1));
        }
        let rate = cur_increasing as f64 / 100.0;
        let coinbase = supply as f64 * rate / supply_cycle as f64;
        let next_height = (cur_supply_count + 1) * supply_cycle + last_decay_height + mint_height - 1;
        Some((coinbase, next_height))
    }

    pub fn exist_fork_section(&self, fork_id: &ForkId, section: &BlockHash) -> bool {
        self.fork_reward
            .get(fork_id)
            .map(|entry| entry.sections.contains_key(section))
            .unwrap_or(false)
    }

    pub fn get_fork_section(&self, fork_id: &ForkId, section: &BlockHash) -> Option<&DeFiRewardSet> {
        self.fork_reward.get(fork_id)?.sections.get(section)
    }

    pub fn add_fork_section(&mut self, fork_id: &ForkId, section: BlockHash, reward: DeFiRewardSet) {
        if let Some(entry) = self.fork_reward.get_mut(fork_id) {
            entry.sections.insert(section, reward);
            while entry.sections.len() > MAX_SECTION_CACHE {
                let oldest = match entry.sections.keys().next() {
                    Some(key) if *key != section => *key,
                    _ => break,
                };
                entry.sections.remove(&oldest);
            }
        }
    }

    /// Distribute `reward` over stake holders by rank.
    ///
    /// Holders below `min_token` are excluded; the rest are sorted ascending by balance and each
    /// is ranked by the first position of its balance (ties share the lowest rank). Every holder
    /// receives `floor(reward / Σranks · rank)`.
    pub fn compute_stake_reward(
        min_token: i64,
        reward: i64,
        balances: &BTreeMap<Destination, i64>,
    ) -> DeFiRewardSet {
        let mut out = DeFiRewardSet::new();
        if reward == 0 {
            return out;
        }

        let mut ranked: Vec<(i64, &Destination)> = balances
            .iter()
            .filter(|(_, amount)| **amount >= min_token)
            .map(|(dest, amount)| (*amount, dest))
            .collect();
        if ranked.is_empty() {
            return out;
        }
        ranked.sort();

        let mut rank = 1u64;
        let mut total = 0u64;
        let mut last_token = -1i64;
        let mut ranks = Vec::with_capacity(ranked.len());
        for (pos, (amount, _)) in ranked.iter().enumerate() {
            if *amount != last_token {
                rank = pos as u64 + 1;
                last_token = *amount;
            }
            ranks.push(rank);
            total += rank;
        }

        let unit = reward as f64 / total as f64;
        for ((_, dest), rank) in ranked.into_iter().zip(ranks) {
            out.insert(dest.clone(), (unit * rank as f64) as i64);
        }
        out
    }

    /// Distribute `reward` over the invite forest by promotion power.
    ///
    /// Walking the forest in post order, each node's subtree balance accumulates bottom-up (in
    /// whole tokens). A node's power is the sum over its non-largest children of a piecewise
    /// multiplier table applied to the child's subtree balance, plus the cube root of the largest
    /// child's subtree balance. Zero total power yields an empty map.
    pub fn compute_promotion_reward(
        reward: i64,
        balances: &BTreeMap<Destination, i64>,
        promotion_token_times: &BTreeMap<i64, u32>,
        relation: &RelationGraph,
    ) -> DeFiRewardSet {
        let mut out = DeFiRewardSet::new();
        if reward == 0 {
            return out;
        }

        let order = relation.post_order();
        let mut amounts = vec![0i64; relation.len()];
        let mut total_power = 0i64;
        let mut powers: Vec<(usize, i64)> = Vec::new();

        for id in order {
            let node = relation.node(id);
            let mut amount = balances.get(&node.dest).copied().unwrap_or(0) / COIN;
            let mut power = 0i64;

            if !node.children.is_empty() {
                let mut max = -1i64;
                for &child in &node.children {
                    let child_amount = amounts[child];
                    amount += child_amount;
                    let counted = if child_amount <= max {
                        child_amount
                    } else {
                        let prior = max;
                        max = child_amount;
                        prior
                    };
                    if counted < 0 {
                        continue;
                    }
                    power += piecewise_power(counted, promotion_token_times);
                }
                power += (max as f64).cbrt().round() as i64;
            }

            amounts[id] = amount;
            if power > 0 {
                total_power += power;
                powers.push((id, power));
            }
        }

        if total_power > 0 {
            let unit = reward as f64 / total_power as f64;
            for (id, power) in powers {
                out.insert(relation.node(id).dest.clone(), (power as f64 * unit) as i64);
            }
        }
        out
    }
}

/// Apply the promotion multiplier table to `tokens`: whole slices below each boundary score
/// `slice · multiplier`, the tail above the last boundary scores 1× per token.
fn piecewise_power(tokens: i64, token_times: &BTreeMap<i64, u32>) -> i64 {
    let mut power = 0i64;
    let mut last = 0i64;
    for (&boundary, &times) in token_times {
        if tokens > boundary {
            power += (boundary - last) * times as i64;
            last = boundary;
        } else {
            power += (tokens - last) * times as i64;
            last = tokens;
            break;
        }
    }
    power + (tokens - last)
}

#[cfg(test)]
mod test {
    use quasar_common_types::Hash256;

    use super::*;
    use crate::forks::{DeFiProfile, ForkType};

    fn fixed_profile() -> ForkProfile {
        ForkProfile {
            name: "defi".into(),
            symbol: "DFI".into(),
            amount: 21_000_000 * COIN,
            joint_height: 150,
            fork_type: ForkType::DeFi,
            defi: Some(DeFiProfile {
                mint_height: 152,
                decay_cycle: 1_036_800,
                coinbase_decay_percent: 50,
                init_coinbase_percent: 10,
                supply_cycle: 43_200,
                reward_cycle: 1_440,
                stake_min_token: 100,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn dest(n: u8) -> Destination {
        Destination::PubKey([n; 32])
    }

    #[test]
    fn prev_reward_height_boundaries() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, fixed_profile());

        assert_eq!(engine.prev_reward_height(&fork, 151), -1);
        assert_eq!(engine.prev_reward_height(&fork, 152), 151);
        assert_eq!(engine.prev_reward_height(&fork, 152 + 1439), 151);
        assert_eq!(engine.prev_reward_height(&fork, 152 + 1440), 151 + 1440);
        assert_eq!(engine.prev_reward_height(&Hash256([9u8; 32]), 10_000), -1);
    }

    #[test]
    fn fixed_first_section_reward() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, fixed_profile());

        // section [152, 152+1440): 21_000_000 coins growing 10% per 43_200-block supply cycle
        let section_end = Hash256([2u8; 32]).with_height(151 + 1440);
        let reward = engine.get_section_reward(&fork, &section_end);
        // 21e12 * 0.10 / 43_200 * 1440 = 70_000_000_000, modulo float truncation
        assert!((reward - 70_000_000_000).abs() <= 1500, "reward = {reward}");
    }

    #[test]
    fn fixed_sections_split_consistently() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, fixed_profile());

        // two consecutive sections equal one double-length section within rounding
        let first = engine.get_section_reward(&fork, &Hash256([2u8; 32]).with_height(151 + 1440));
        let second = engine.get_section_reward(&fork, &Hash256([3u8; 32]).with_height(151 + 2880));
        assert!(first > 0 && second > 0);
        assert!((first - second).abs() <= 2, "sections within one supply cycle mint equally");
    }

    #[test]
    fn unknown_fork_reward_is_negative() {
        let engine = DeFiForkReward::new();
        assert_eq!(
            engine.get_section_reward(&Hash256([5u8; 32]), &Hash256([6u8; 32]).with_height(5000)),
            -1
        );
    }

    #[test]
    fn non_defi_fork_reward_is_negative() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        let mut profile = fixed_profile();
        profile.defi = None;
        profile.fork_type = ForkType::Common;
        engine.add_fork(fork, profile);
        assert_eq!(
            engine.get_section_reward(&fork, &Hash256([2u8; 32]).with_height(5000)),
            -1
        );
    }

    fn specific_profile() -> ForkProfile {
        ForkProfile {
            name: "defi-spec".into(),
            symbol: "DFS".into(),
            amount: 10_000_000 * COIN,
            joint_height: 1498,
            fork_type: ForkType::DeFi,
            defi: Some(DeFiProfile {
                mint_height: 1500,
                coinbase_type: CoinbaseType::Specific,
                supply_cycle: 43_200,
                reward_cycle: 1_440,
                coinbase_percent: [
                    (259_200i32, 10u32),
                    (777_600, 8),
                    (1_814_400, 5),
                    (3_369_600, 3),
                    (5_184_000, 2),
                ]
                .into_iter()
                .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn specific_first_section_reward() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, specific_profile());

        let section_end = Hash256([2u8; 32]).with_height(1499 + 1440);
        let reward = engine.get_section_reward(&fork, &section_end);
        // 1e13 * 0.10 / 43_200 * 1440 = 33_333_333_333.33…
        assert!((reward - 33_333_333_333).abs() <= 1500, "reward = {reward}");
    }

    #[test]
    fn specific_schedule_ends_after_last_boundary() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, specific_profile());

        // past the last boundary the per-block coinage is zero
        let far = Hash256([2u8; 32]).with_height((5_184_000 + 1500 - 1 + 1440) as u32);
        assert_eq!(engine.get_section_reward(&fork, &far), 0);
    }

    #[test]
    fn stake_reward_ranks_with_shared_ties() {
        let mut balances = BTreeMap::new();
        balances.insert(dest(1), 100);
        balances.insert(dest(2), 200);
        balances.insert(dest(3), 200);
        balances.insert(dest(4), 400);
        balances.insert(dest(5), 10); // below the minimum

        let reward = DeFiForkReward::compute_stake_reward(100, 700, &balances);
        assert_eq!(reward.len(), 4);
        // ranks: 100 -> 1, 200 -> 2, 200 -> 2, 400 -> 4; total 9; unit = 700/9
        let unit = 700f64 / 9f64;
        assert_eq!(reward[&dest(1)], unit as i64);
        assert_eq!(reward[&dest(2)], (unit * 2.0) as i64);
        assert_eq!(reward[&dest(3)], (unit * 2.0) as i64);
        assert_eq!(reward[&dest(4)], (unit * 4.0) as i64);
        let paid: i64 = reward.values().sum();
        assert!(paid <= 700);
    }

    #[test]
    fn stake_reward_zero_reward_is_empty() {
        let mut balances = BTreeMap::new();
        balances.insert(dest(1), 1000);
        assert!(DeFiForkReward::compute_stake_reward(1, 0, &balances).is_empty());
    }

    #[test]
    fn promotion_reward_isolated_root_is_empty() {
        let graph = RelationGraph::construct(&BTreeMap::new());
        let mut balances = BTreeMap::new();
        balances.insert(dest(1), 1000 * COIN);
        let reward =
            DeFiForkReward::compute_promotion_reward(10_000, &balances, &BTreeMap::new(), &graph);
        assert!(reward.is_empty());
    }

    #[test]
    fn piecewise_power_slices() {
        let times: BTreeMap<i64, u32> = [(10i64, 5u32), (100, 3)].into_iter().collect();
        // 4 tokens: all below the first boundary at 5x
        assert_eq!(piecewise_power(4, &times), 20);
        // 50 tokens: 10 at 5x, 40 at 3x
        assert_eq!(piecewise_power(50, &times), 50 + 120);
        // 200 tokens: 10 at 5x, 90 at 3x, tail 100 at 1x
        assert_eq!(piecewise_power(200, &times), 50 + 270 + 100);
        // an empty table is 1x throughout
        assert_eq!(piecewise_power(7, &BTreeMap::new()), 7);
        assert_eq!(piecewise_power(0, &times), 0);
    }
}
