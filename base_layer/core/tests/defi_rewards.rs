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

use std::collections::BTreeMap;

use quasar_common_types::Hash256;
use quasar_core::{
    chain_storage::db::AddrInfo,
    consensus::COIN,
    defi::{DeFiForkReward, RelationGraph},
    forks::{CoinbaseType, DeFiProfile, ForkProfile, ForkType},
    transactions::Destination,
};

fn dest(n: u8) -> Destination {
    Destination::PubKey([n; 32])
}

fn fixed_defi_profile() -> ForkProfile {
    ForkProfile {
        name: "defi-main".into(),
        symbol: "DFM".into(),
        amount: 21_000_000 * COIN,
        joint_height: 150,
        fork_type: ForkType::DeFi,
        defi: Some(DeFiProfile {
            mint_height: 152,
            coinbase_type: CoinbaseType::Fixed,
            decay_cycle: 1_036_800,
            coinbase_decay_percent: 50,
            init_coinbase_percent: 10,
            supply_cycle: 43_200,
            reward_cycle: 1_440,
            stake_min_token: 100,
            stake_reward_percent: 50,
            promotion_reward_percent: 50,
            promotion_token_times: [(10_000i64, 10u32)].into_iter().collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

mod supply_schedule {
    use super::*;

    #[test]
    fn fixed_coinbase_first_cycle_matches_expectation() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, fixed_defi_profile());

        // 21_000_000 tokens at 10% per 43_200-block supply cycle, first 1440-block reward
        // section: 21e12 * 0.1 / 43_200 * 1440 ≈ 70_000_000_000
        let reward = engine.get_section_reward(&fork, &Hash256([2u8; 32]).with_height(151 + 1440));
        assert!((reward - 70_000_000_000).abs() <= 1500, "reward = {reward}");
    }

    #[test]
    fn section_rewards_are_additive_across_cycles() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, fixed_defi_profile());

        // thirty consecutive sections cover one supply cycle: their sum must match a direct
        // sweep of the same interval within per-section rounding
        let mut total = 0i64;
        let mut sections = 0i64;
        for k in 1..=30 {
            let end = Hash256([3u8; 32]).with_height(151 + 1440 * k);
            let section = engine.get_section_reward(&fork, &end);
            assert!(section > 0);
            total += section;
            sections += 1;
        }
        // every section inside the first supply cycle mints the same amount
        let first = engine.get_section_reward(&fork, &Hash256([4u8; 32]).with_height(151 + 1440));
        assert!((total - first * sections).abs() <= sections);
    }

    #[test]
    fn reward_heights_before_mint_are_negative() {
        let mut engine = DeFiForkReward::new();
        let fork = Hash256([1u8; 32]);
        engine.add_fork(fork, fixed_defi_profile());
        assert_eq!(engine.prev_reward_height(&fork, 151), -1);
        assert_eq!(engine.prev_reward_height(&fork, 0), -1);
        assert!(engine.prev_reward_height(&fork, 152) >= 0);
    }
}

mod promotion_tree {
    use super::*;

    fn info(parent: &Destination) -> AddrInfo {
        AddrInfo {
            parent: parent.clone(),
            root: parent.clone(),
            txid: Hash256([0xaa; 32]),
        }
    }

    /// The three-level fixture: A -> {a1, a2, a3}; a1 -> a11 -> a111; a2 -> {a21, a22};
    /// a22 -> {a221, a222}.
    fn build_relation() -> (RelationGraph, BTreeMap<Destination, i64>) {
        let a = dest(1);
        let a1 = dest(11);
        let a2 = dest(12);
        let a3 = dest(13);
        let a11 = dest(21);
        let a111 = dest(31);
        let a21 = dest(22);
        let a22 = dest(23);
        let a221 = dest(32);
        let a222 = dest(33);

        let mut relations = BTreeMap::new();
        relations.insert(a1.clone(), info(&a));
        relations.insert(a2.clone(), info(&a));
        relations.insert(a3.clone(), info(&a));
        relations.insert(a11.clone(), info(&a1));
        relations.insert(a111.clone(), info(&a11));
        relations.insert(a21.clone(), info(&a2));
        relations.insert(a22.clone(), info(&a2));
        relations.insert(a221.clone(), info(&a22));
        relations.insert(a222.clone(), info(&a22));
        let graph = RelationGraph::construct(&relations);

        let mut balances = BTreeMap::new();
        for node in [&a, &a1, &a2, &a3, &a11, &a111, &a21, &a22, &a221, &a222] {
            balances.insert(node.clone(), 100 * COIN);
        }
        (graph, balances)
    }

    #[test]
    fn only_inner_nodes_earn_promotion_rewards() {
        let (graph, balances) = build_relation();
        let reward_total = 1_000_000i64;
        let rewards = DeFiForkReward::compute_promotion_reward(
            reward_total,
            &balances,
            &BTreeMap::new(),
            &graph,
        );

        let expected: BTreeMap<Destination, ()> =
            [dest(1), dest(11), dest(21), dest(12), dest(23)]
                .into_iter()
                .map(|d| (d, ()))
                .collect();
        let got: Vec<_> = rewards.keys().cloned().collect();
        assert_eq!(got.len(), expected.len(), "rewarded set: {got:?}");
        for d in rewards.keys() {
            assert!(expected.contains_key(d), "unexpected reward for {d}");
        }

        let paid: i64 = rewards.values().sum();
        assert!(paid <= reward_total);
        assert!(paid > 0);
    }

    #[test]
    fn zero_total_power_returns_empty_map() {
        // nobody holds anything, so no power accrues anywhere
        let (graph, _) = build_relation();
        let rewards = DeFiForkReward::compute_promotion_reward(
            1_000_000,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &graph,
        );
        assert!(rewards.is_empty());
    }

    #[test]
    fn multiplier_table_boosts_small_subtrees() {
        let (graph, balances) = build_relation();
        let table: BTreeMap<i64, u32> = [(10_000i64, 10u32)].into_iter().collect();
        let boosted =
            DeFiForkReward::compute_promotion_reward(1_000_000, &balances, &table, &graph);
        let flat = DeFiForkReward::compute_promotion_reward(
            1_000_000,
            &balances,
            &BTreeMap::new(),
            &graph,
        );
        // the same nodes are rewarded either way; only the split moves
        assert_eq!(
            boosted.keys().collect::<Vec<_>>(),
            flat.keys().collect::<Vec<_>>()
        );
    }
}

mod stake_ranking {
    use super::*;

    #[test]
    fn ranks_are_first_position_of_each_amount() {
        let mut balances = BTreeMap::new();
        balances.insert(dest(1), 1_000);
        balances.insert(dest(2), 1_000);
        balances.insert(dest(3), 2_000);
        balances.insert(dest(4), 3_000);

        // ranks: 1, 1, 3, 4 -> total 9
        let rewards = DeFiForkReward::compute_stake_reward(1, 900, &balances);
        assert_eq!(rewards[&dest(1)], 100);
        assert_eq!(rewards[&dest(2)], 100);
        assert_eq!(rewards[&dest(3)], 300);
        assert_eq!(rewards[&dest(4)], 400);
    }

    #[test]
    fn threshold_excludes_small_holders() {
        let mut balances = BTreeMap::new();
        balances.insert(dest(1), 50);
        balances.insert(dest(2), 500);
        let rewards = DeFiForkReward::compute_stake_reward(100, 1_000, &balances);
        assert_eq!(rewards.len(), 1);
        assert!(rewards.contains_key(&dest(2)));
    }
}
