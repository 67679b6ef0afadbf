// Copyright 2019. The Quasar Development Community
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

use serde::{Deserialize, Serialize};

use crate::consensus::Network;

/// Fixed-point token unit: amounts carry six decimals.
pub const COIN: i64 = 1_000_000;
pub const CENT: i64 = 10_000;
pub const MAX_MONEY: i64 = 1_000_000_000_000 * COIN;

pub fn money_range(value: i64) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// The fee floor for a transaction carrying `data_len` bytes of payload: a base fee plus a
/// surcharge per started 200-byte slice, steeper past the fifth slice.
pub fn calc_min_tx_fee(data_len: usize, min_fee: i64) -> i64 {
    if data_len == 0 {
        return min_fee;
    }
    let multiplier = (data_len as i64 + 199) / 200;
    if multiplier > 5 {
        min_fee + 1000 + (multiplier - 5) * 400
    } else {
        min_fee + multiplier * 200
    }
}

/// All tunable consensus parameters of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConstants {
    pub network: Network,
    /// Ceiling on a serialized block.
    pub max_block_size: usize,
    /// Ceiling on non-mint transactions a block may carry.
    pub max_block_tx_count: usize,
    pub min_tx_fee: i64,
    /// Target seconds between primary blocks.
    pub block_spacing: u32,
    /// Seconds between extended blocks inside one primary slot.
    pub extended_spacing: u32,
    /// Per-algorithm floor on seconds between PoW blocks.
    pub pow_spacing: u32,
    /// How far into the future a block timestamp may run ahead of local time.
    pub timestamp_drift: u32,
    /// Difficulty re-targets every this many primary blocks.
    pub pow_difficulty_interval: u32,
    /// Easiest permitted difficulty (fewest required leading zero bits).
    pub pow_limit_bits: u8,
    /// Hardest permitted difficulty.
    pub pow_upper_bits: u8,
    /// Difficulty of the first mined block.
    pub pow_init_bits: u8,
    /// Blocks a mint output stays unspendable.
    pub mint_maturity: u32,
    pub primary_mint_reward: i64,
    /// Primary mint reward halves every this many heights; 0 disables halving.
    pub reward_halve_cycle: u32,
    /// Width of the delegate enrollment window, in primary blocks.
    pub enroll_interval: u32,
    /// Blocks between enrollment cutoff and agreement publication.
    pub distribute_interval: u32,
    pub min_enroll_amount: i64,
    /// Primary height from which DPoS agreements may elect block makers.
    pub dpos_begin_height: u32,
    /// Ceiling on the ballot list derived from one agreement.
    pub max_ballot_size: usize,
    pub genesis_timestamp: u32,
    pub genesis_amount: i64,
    /// ed25519 public key of the genesis owner destination.
    pub genesis_owner_pubkey: [u8; 32],
}

impl ConsensusConstants {
    /// The earliest height at which a block can carry a stake agreement: the enrollment window
    /// plus the distribution window plus the publication block itself.
    pub fn consensus_interval(&self) -> u32 {
        self.enroll_interval + self.distribute_interval + 1
    }

    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            max_block_size: 2_000_000,
            max_block_tx_count: 8_000,
            min_tx_fee: CENT,
            block_spacing: 60,
            extended_spacing: 2,
            pow_spacing: 20,
            timestamp_drift: 90,
            pow_difficulty_interval: 30,
            pow_limit_bits: 8,
            pow_upper_bits: 200,
            pow_init_bits: 20,
            mint_maturity: 120,
            primary_mint_reward: 20 * COIN,
            reward_halve_cycle: 1_051_200,
            enroll_interval: 30,
            distribute_interval: 15,
            min_enroll_amount: 100_000 * COIN,
            dpos_begin_height: 1_000,
            max_ballot_size: 21,
            genesis_timestamp: 1_575_043_200,
            genesis_amount: 300_000_000 * COIN,
            genesis_owner_pubkey: [
                0x57, 0x37, 0x36, 0x11, 0x8d, 0x21, 0x53, 0x1e, 0x17, 0x84, 0xa6, 0x11, 0x09, 0xbc,
                0x5c, 0x3a, 0x3e, 0x11, 0xe4, 0x36, 0x2c, 0x42, 0x9e, 0x8a, 0x64, 0x09, 0x6b, 0xb0,
                0x3b, 0x4f, 0x0e, 0x45,
            ],
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            pow_limit_bits: 4,
            pow_init_bits: 10,
            min_enroll_amount: 1_000 * COIN,
            dpos_begin_height: 100,
            genesis_timestamp: 1_575_129_600,
            ..Self::mainnet()
        }
    }

    pub fn local_test() -> Self {
        Self {
            network: Network::LocalTest,
            block_spacing: 1,
            extended_spacing: 1,
            pow_spacing: 1,
            timestamp_drift: 3_600,
            pow_difficulty_interval: 8,
            pow_limit_bits: 1,
            pow_upper_bits: 32,
            pow_init_bits: 2,
            mint_maturity: 0,
            primary_mint_reward: 20 * COIN,
            reward_halve_cycle: 0,
            enroll_interval: 5,
            distribute_interval: 2,
            min_enroll_amount: 10 * COIN,
            dpos_begin_height: 10_000_000,
            min_tx_fee: 100,
            genesis_timestamp: 1_600_000_000,
            genesis_amount: 1_000_000 * COIN,
            ..Self::mainnet()
        }
    }
}

/// Builder used by nodes and tests to derive constants for a network, overriding individual
/// parameters where a scenario calls for it.
pub struct ConsensusConstantsBuilder {
    constants: ConsensusConstants,
}

impl ConsensusConstantsBuilder {
    pub fn new(network: Network) -> Self {
        let constants = match network {
            Network::Mainnet => ConsensusConstants::mainnet(),
            Network::Testnet => ConsensusConstants::testnet(),
            Network::LocalTest => ConsensusConstants::local_test(),
        };
        Self { constants }
    }

    pub fn with_genesis_owner(mut self, pubkey: [u8; 32]) -> Self {
        self.constants.genesis_owner_pubkey = pubkey;
        self
    }

    pub fn with_genesis_timestamp(mut self, timestamp: u32) -> Self {
        self.constants.genesis_timestamp = timestamp;
        self
    }

    pub fn with_enroll_interval(mut self, enroll: u32, distribute: u32) -> Self {
        self.constants.enroll_interval = enroll;
        self.constants.distribute_interval = distribute;
        self
    }

    pub fn with_pow_difficulty_interval(mut self, interval: u32) -> Self {
        self.constants.pow_difficulty_interval = interval;
        self
    }

    pub fn with_min_enroll_amount(mut self, amount: i64) -> Self {
        self.constants.min_enroll_amount = amount;
        self
    }

    pub fn build(self) -> ConsensusConstants {
        self.constants
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn min_fee_steps_per_data_slice() {
        assert_eq!(calc_min_tx_fee(0, 100), 100);
        assert_eq!(calc_min_tx_fee(1, 100), 300);
        assert_eq!(calc_min_tx_fee(200, 100), 300);
        assert_eq!(calc_min_tx_fee(201, 100), 500);
        assert_eq!(calc_min_tx_fee(1000, 100), 1100);
        // past five slices the surcharge steepens
        assert_eq!(calc_min_tx_fee(1001, 100), 100 + 1000 + 400);
    }

    #[test]
    fn money_bounds() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
    }

    #[test]
    fn consensus_interval_spans_both_windows() {
        let constants = ConsensusConstants::mainnet();
        assert_eq!(
            constants.consensus_interval(),
            constants.enroll_interval + constants.distribute_interval + 1
        );
    }

    #[test]
    fn builder_overrides() {
        let constants = ConsensusConstantsBuilder::new(Network::LocalTest)
            .with_enroll_interval(7, 3)
            .build();
        assert_eq!(constants.enroll_interval, 7);
        assert_eq!(constants.distribute_interval, 3);
        assert_eq!(constants.network, Network::LocalTest);
    }
}
