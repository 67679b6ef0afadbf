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

use crate::transactions::Destination;

/// A tiny deterministic generator for the ballot walk. Consensus-critical: every node must
/// reproduce the identical sequence for a given agreement digest.
struct BeaconWalk {
    state: u64,
}

impl BeaconWalk {
    fn seeded_from(agreement: &Hash256) -> Self {
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&agreement.as_bytes()[..8]);
        let state = u64::from_le_bytes(seed);
        Self {
            // xorshift has a fixed point at zero
            state: if state == 0 { 0x9e37_79b9_7f4a_7c15 } else { state },
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }
}

/// Derive the ordered ballot list for one agreement: a deterministic pseudo-random permutation
/// seeded by the agreement digest, weighted by the enrolled stake amounts. Delegates are drawn
/// without replacement until `max_ballot` entries are selected or the candidates are exhausted.
///
/// An empty ballot map (a proof-of-work round) yields an empty list.
pub fn get_delegated_ballot(
    agreement: &Hash256,
    weight: u32,
    map_ballot: &BTreeMap<Destination, u32>,
    vec_amount: &[(Destination, i64)],
    _money_supply: i64,
    _block_height: u32,
    max_ballot: usize,
) -> Vec<Destination> {
    if map_ballot.is_empty() || weight == 0 {
        return Vec::new();
    }

    // candidates in enrollment order, weighted by stake
    let mut candidates: Vec<(Destination, i64)> = vec_amount
        .iter()
        .filter(|(dest, amount)| *amount > 0 && map_ballot.contains_key(dest))
        .cloned()
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut walk = BeaconWalk::seeded_from(agreement);
    let mut ballot = Vec::new();
    while !candidates.is_empty() && ballot.len() < max_ballot {
        let total: i64 = candidates.iter().map(|(_, amount)| amount).sum();
        let mut pick = (walk.next() % (total as u64)) as i64;
        let mut selected = candidates.len() - 1;
        for (i, (_, amount)) in candidates.iter().enumerate() {
            if pick < *amount {
                selected = i;
                break;
            }
            pick -= amount;
        }
        let (dest, _) = candidates.remove(selected);
        ballot.push(dest);
    }
    ballot
}

#[cfg(test)]
mod test {
    use super::*;

    fn dest(n: u8) -> Destination {
        Destination::PubKey([n; 32])
    }

    fn setup() -> (BTreeMap<Destination, u32>, Vec<(Destination, i64)>) {
        let mut map = BTreeMap::new();
        let mut amounts = Vec::new();
        for n in 1..=5u8 {
            map.insert(dest(n), n as u32);
            amounts.push((dest(n), (n as i64) * 1_000_000));
        }
        (map, amounts)
    }

    #[test]
    fn empty_map_yields_pow() {
        let ballot = get_delegated_ballot(&Hash256([1; 32]), 1, &BTreeMap::new(), &[], 0, 10, 21);
        assert!(ballot.is_empty());
    }

    #[test]
    fn ballot_is_deterministic() {
        let (map, amounts) = setup();
        let agreement = Hash256([7u8; 32]);
        let a = get_delegated_ballot(&agreement, 5, &map, &amounts, 0, 10, 21);
        let b = get_delegated_ballot(&agreement, 5, &map, &amounts, 0, 10, 21);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn seed_changes_preserve_membership() {
        let (map, amounts) = setup();
        let a = get_delegated_ballot(&Hash256([7u8; 32]), 5, &map, &amounts, 0, 10, 21);
        let b = get_delegated_ballot(&Hash256([8u8; 32]), 5, &map, &amounts, 0, 10, 21);
        // membership never changes with the seed, only the order may
        let mut sa = a.clone();
        let mut sb = b;
        sa.sort();
        sb.sort();
        assert_eq!(sa, sb);
        assert_eq!(sa.len(), 5);
    }

    #[test]
    fn draws_without_replacement_and_respects_cap() {
        let (map, amounts) = setup();
        let ballot = get_delegated_ballot(&Hash256([9u8; 32]), 5, &map, &amounts, 0, 10, 3);
        assert_eq!(ballot.len(), 3);
        let mut unique = ballot.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn unenrolled_amounts_are_ignored() {
        let (map, mut amounts) = setup();
        amounts.push((dest(9), 50_000_000));
        let ballot = get_delegated_ballot(&Hash256([3u8; 32]), 5, &map, &amounts, 0, 10, 21);
        assert!(!ballot.contains(&dest(9)));
    }
}
