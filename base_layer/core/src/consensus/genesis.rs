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

use quasar_common_types::Hash256;

use crate::{
    blocks::{Block, BlockType},
    consensus::ConsensusConstants,
    forks::{ForkProfile, ForkType, ProfileFlags},
    transactions::{Destination, Transaction, TxType},
};

/// Construct the genesis block the given constants describe. The genesis block carries the
/// primary-fork profile in its proof and mints the initial supply to the genesis owner.
pub fn get_genesis_block(constants: &ConsensusConstants) -> Block {
    let owner = Destination::PubKey(constants.genesis_owner_pubkey);
    let profile = ForkProfile {
        version: 1,
        name: format!("Quasar Network {}", constants.network),
        symbol: "QSR".into(),
        flags: ProfileFlags::empty(),
        amount: constants.genesis_amount,
        mint_reward: constants.primary_mint_reward,
        min_tx_fee: constants.min_tx_fee,
        halve_cycle: constants.reward_halve_cycle,
        owner: owner.clone(),
        parent: Hash256::zero(),
        joint_height: -1,
        fork_type: ForkType::Common,
        defi: None,
    };

    let tx_mint = Transaction {
        version: 1,
        tx_type: TxType::MintGenesis as u16,
        timestamp: constants.genesis_timestamp,
        send_to: owner,
        amount: constants.genesis_amount,
        ..Default::default()
    };

    let mut block = Block {
        version: 1,
        block_type: BlockType::Genesis as u16,
        timestamp: constants.genesis_timestamp,
        hash_prev: Hash256::zero(),
        proof: profile.save(),
        tx_mint,
        ..Default::default()
    };
    block.hash_merkle = block.calc_merkle_root();
    block
}
