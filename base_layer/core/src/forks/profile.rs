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

use bitflags::bitflags;
use quasar_common_types::ForkId;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{ByteReader, CodecError, Decodable, Encodable},
    transactions::Destination,
};

bitflags! {
    /// Isolation flags of a fork profile.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProfileFlags: u8 {
        /// The fork starts from an empty coin set instead of inheriting the parent view.
        const ISOLATED = 0b0000_0001;
        /// The fork is not announced to peers that have not subscribed to it.
        const PRIVATE  = 0b0000_0010;
        /// No further forks may join on top of this fork.
        const ENCLOSED = 0b0000_0100;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ForkType {
    #[default]
    Common = 0,
    DeFi = 1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CoinbaseType {
    #[default]
    Fixed = 0,
    Specific = 1,
}

/// The DeFi parameter block of a fork profile.
///
/// `mint_height` of −1 means "two blocks after the joint height". `coinbase_percent` is only
/// consulted for [`CoinbaseType::Specific`] schedules; its keys are heights relative to the mint
/// height and its values are whole percentages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeFiProfile {
    pub mint_height: i32,
    pub max_supply: i64,
    pub coinbase_type: CoinbaseType,
    pub decay_cycle: i32,
    pub coinbase_decay_percent: u8,
    pub init_coinbase_percent: u32,
    pub supply_cycle: i32,
    pub reward_cycle: i32,
    pub stake_min_token: i64,
    pub stake_reward_percent: u32,
    pub promotion_reward_percent: u32,
    pub promotion_token_times: BTreeMap<i64, u32>,
    pub coinbase_percent: BTreeMap<i32, u32>,
}

impl Default for DeFiProfile {
    fn default() -> Self {
        Self {
            mint_height: -1,
            max_supply: 0,
            coinbase_type: CoinbaseType::Fixed,
            decay_cycle: 0,
            coinbase_decay_percent: 0,
            init_coinbase_percent: 0,
            supply_cycle: 0,
            reward_cycle: 0,
            stake_min_token: 0,
            stake_reward_percent: 0,
            promotion_reward_percent: 0,
            promotion_token_times: BTreeMap::new(),
            coinbase_percent: BTreeMap::new(),
        }
    }
}

impl DeFiProfile {
    pub fn is_null(&self) -> bool {
        self.reward_cycle == 0
    }

    /// The height at which DeFi minting starts for a fork joined at `joint_height`.
    pub fn effective_mint_height(&self, joint_height: i32) -> i32 {
        if self.mint_height < 0 {
            joint_height + 2
        } else {
            self.mint_height
        }
    }
}

impl Encodable for DeFiProfile {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.mint_height.encode_into(buf)?;
        self.max_supply.encode_into(buf)?;
        buf.push(self.coinbase_type as u8);
        self.decay_cycle.encode_into(buf)?;
        buf.push(self.coinbase_decay_percent);
        self.init_coinbase_percent.encode_into(buf)?;
        self.supply_cycle.encode_into(buf)?;
        self.reward_cycle.encode_into(buf)?;
        self.stake_min_token.encode_into(buf)?;
        self.stake_reward_percent.encode_into(buf)?;
        self.promotion_reward_percent.encode_into(buf)?;
        self.promotion_token_times.encode_into(buf)?;
        self.coinbase_percent.encode_into(buf)
    }
}

impl Decodable for DeFiProfile {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            mint_height: reader.read_i32()?,
            max_supply: reader.read_i64()?,
            coinbase_type: match reader.read_u8()? {
                0 => CoinbaseType::Fixed,
                1 => CoinbaseType::Specific,
                other => {
                    return Err(CodecError::InvalidValue(format!(
                        "unknown coinbase type {other}"
                    )))
                },
            },
            decay_cycle: reader.read_i32()?,
            coinbase_decay_percent: reader.read_u8()?,
            init_coinbase_percent: reader.read_u32()?,
            supply_cycle: reader.read_i32()?,
            reward_cycle: reader.read_i32()?,
            stake_min_token: reader.read_i64()?,
            stake_reward_percent: reader.read_u32()?,
            promotion_reward_percent: reader.read_u32()?,
            promotion_token_times: BTreeMap::decode_from(reader)?,
            coinbase_percent: BTreeMap::decode_from(reader)?,
        })
    }
}

/// A fork profile: everything a fork's origin block declares about the fork. Origin blocks carry
/// the canonical encoding of this record in their proof payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkProfile {
    pub version: u16,
    pub name: String,
    pub symbol: String,
    pub flags: ProfileFlags,
    pub amount: i64,
    pub mint_reward: i64,
    pub min_tx_fee: i64,
    pub halve_cycle: u32,
    pub owner: Destination,
    pub parent: ForkId,
    pub joint_height: i32,
    pub fork_type: ForkType,
    pub defi: Option<DeFiProfile>,
}

impl Default for ForkProfile {
    fn default() -> Self {
        Self {
            version: 1,
            name: String::new(),
            symbol: String::new(),
            flags: ProfileFlags::empty(),
            amount: 0,
            mint_reward: 0,
            min_tx_fee: 0,
            halve_cycle: 0,
            owner: Destination::Null,
            parent: ForkId::zero(),
            joint_height: -1,
            fork_type: ForkType::Common,
            defi: None,
        }
    }
}

impl ForkProfile {
    pub fn is_null(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_isolated(&self) -> bool {
        self.flags.contains(ProfileFlags::ISOLATED)
    }

    pub fn is_private(&self) -> bool {
        self.flags.contains(ProfileFlags::PRIVATE)
    }

    pub fn is_enclosed(&self) -> bool {
        self.flags.contains(ProfileFlags::ENCLOSED)
    }

    pub fn is_defi(&self) -> bool {
        self.fork_type == ForkType::DeFi
    }

    /// Serialize the profile for embedding in an origin block's proof payload.
    pub fn save(&self) -> Vec<u8> {
        self.encoded()
    }

    /// Parse a profile out of an origin block's proof payload.
    pub fn load(proof: &[u8]) -> Result<Self, CodecError> {
        let profile = Self::decode(proof)?;
        if profile.version != 1 {
            return Err(CodecError::InvalidValue(format!(
                "unsupported profile version {}",
                profile.version
            )));
        }
        Ok(profile)
    }
}

impl Encodable for ForkProfile {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.version.encode_into(buf)?;
        self.name.encode_into(buf)?;
        self.symbol.encode_into(buf)?;
        buf.push(self.flags.bits());
        self.amount.encode_into(buf)?;
        self.mint_reward.encode_into(buf)?;
        self.min_tx_fee.encode_into(buf)?;
        self.halve_cycle.encode_into(buf)?;
        self.owner.encode_into(buf)?;
        self.parent.encode_into(buf)?;
        self.joint_height.encode_into(buf)?;
        buf.push(self.fork_type as u8);
        match &self.defi {
            Some(defi) => {
                buf.push(1);
                defi.encode_into(buf)
            },
            None => {
                buf.push(0);
                Ok(())
            },
        }
    }
}

impl Decodable for ForkProfile {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: reader.read_u16()?,
            name: String::decode_from(reader)?,
            symbol: String::decode_from(reader)?,
            flags: ProfileFlags::from_bits_truncate(reader.read_u8()?),
            amount: reader.read_i64()?,
            mint_reward: reader.read_i64()?,
            min_tx_fee: reader.read_i64()?,
            halve_cycle: reader.read_u32()?,
            owner: Destination::decode_from(reader)?,
            parent: reader.read_hash()?,
            joint_height: reader.read_i32()?,
            fork_type: match reader.read_u8()? {
                0 => ForkType::Common,
                1 => ForkType::DeFi,
                other => {
                    return Err(CodecError::InvalidValue(format!("unknown fork type {other}")))
                },
            },
            defi: match reader.read_u8()? {
                0 => None,
                1 => Some(DeFiProfile::decode_from(reader)?),
                other => {
                    return Err(CodecError::InvalidValue(format!(
                        "invalid defi presence byte {other}"
                    )))
                },
            },
        })
    }
}
