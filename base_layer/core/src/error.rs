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

use quasar_storage::KeyValStoreError;
use thiserror::Error;

use crate::codec::CodecError;

/// The error surface of the consensus core. Clients receive the symbolic name of the variant;
/// `Duplicate` (`ALREADY_HAVE`) is not an error for ingest pipelines, and `MissingPrev` is a
/// request to fetch the predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("The requested module is unavailable")]
    Unavailable,
    #[error("The requested entry was not found")]
    NotFound,
    #[error("The block or context is already known")]
    AlreadyHave,
    #[error("The predecessor of the submitted block is unknown")]
    MissingPrev,
    #[error("Storage failure: {0}")]
    StorageError(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("The block does not belong to a valid fork")]
    BlockInvalidFork,
    #[error("The proof of work does not satisfy the required target")]
    BlockProofOfWorkInvalid,
    #[error("The delegated proof of stake agreement is invalid")]
    BlockProofOfStakeInvalid,
    #[error("The block timestamp is out of range")]
    BlockTimestampOutOfRange,
    #[error("The coinbase of the block is invalid")]
    BlockCoinbaseInvalid,
    #[error("The block carries invalid transactions")]
    BlockTransactionsInvalid,
    #[error("The block signature does not verify")]
    BlockSignatureInvalid,
    #[error("The block carries more enrollment transactions than the window allows")]
    BlockCertTxOutOfBound,
    #[error("The transaction is malformed")]
    TransactionInvalid,
    #[error("A transaction input cannot be resolved")]
    TransactionInputInvalid,
    #[error("The transaction fee is below the required floor")]
    TransactionNotEnoughFee,
    #[error("The transaction signature does not verify")]
    TransactionSignatureInvalid,
    #[error("Two transactions in the block spend the same output")]
    TransactionConflictingInput,
}

impl ChainError {
    /// The symbolic error name exposed to callers.
    pub fn code(&self) -> &'static str {
        use ChainError::*;
        match self {
            Unavailable => "UNAVAILABLE",
            NotFound => "NOT_FOUND",
            AlreadyHave => "ALREADY_HAVE",
            MissingPrev => "MISSING_PREV",
            StorageError(_) => "SYS_STORAGE_ERROR",
            OutOfMemory => "SYS_OUT_OF_MEMORY",
            BlockInvalidFork => "BLOCK_INVALID_FORK",
            BlockProofOfWorkInvalid => "BLOCK_PROOF_OF_WORK_INVALID",
            BlockProofOfStakeInvalid => "BLOCK_PROOF_OF_STAKE_INVALID",
            BlockTimestampOutOfRange => "BLOCK_TIMESTAMP_OUT_OF_RANGE",
            BlockCoinbaseInvalid => "BLOCK_COINBASE_INVALID",
            BlockTransactionsInvalid => "BLOCK_TRANSACTIONS_INVALID",
            BlockSignatureInvalid => "BLOCK_SIGNATURE_INVALID",
            BlockCertTxOutOfBound => "BLOCK_CERTTX_OUT_OF_BOUND",
            TransactionInvalid => "TRANSACTION_INVALID",
            TransactionInputInvalid => "TRANSACTION_INPUT_INVALID",
            TransactionNotEnoughFee => "TRANSACTION_NOT_ENOUGH_FEE",
            TransactionSignatureInvalid => "TRANSACTION_SIGNATURE_INVALID",
            TransactionConflictingInput => "TRANSACTION_CONFLICTING_INPUT",
        }
    }

    /// True for conditions that leave the block permanently unacceptable, as opposed to
    /// storage/transient failures.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(
            self,
            ChainError::Unavailable | ChainError::StorageError(_) | ChainError::OutOfMemory
        )
    }
}

impl From<KeyValStoreError> for ChainError {
    fn from(err: KeyValStoreError) -> Self {
        ChainError::StorageError(err.to_string())
    }
}

impl From<CodecError> for ChainError {
    fn from(err: CodecError) -> Self {
        ChainError::StorageError(format!("codec: {err}"))
    }
}
