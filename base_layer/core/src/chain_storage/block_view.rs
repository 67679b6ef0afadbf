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

use std::collections::{HashMap, HashSet};

use quasar_common_types::{BlockHash, ForkId, TxId};

use crate::{
    blocks::BlockEx,
    error::ChainError,
    transactions::{Destination, Transaction, TxContext, TxOut, TxOutPoint},
};

/// Read access to a fork's persistent unspent set; implemented by the block container. The view
/// overlay falls through to this for points it has not touched.
pub trait UnspentReader {
    fn get_unspent(&self, fork: &ForkId, point: &TxOutPoint) -> Result<Option<TxOut>, ChainError>;
}

/// Overlay state of one output point. `opt` counts enables minus disables: when it returns to
/// zero the point has reverted to its persistent state and drops out of the commit delta.
#[derive(Debug, Clone, Default)]
struct ViewUnspent {
    output: Option<TxOut>,
    opt: i32,
}

impl ViewUnspent {
    fn enable(&mut self, output: TxOut) {
        self.output = Some(output);
        self.opt += 1;
    }

    fn disable(&mut self) {
        self.output = None;
        self.opt -= 1;
    }

    fn is_modified(&self) -> bool {
        self.opt != 0
    }
}

/// A transactional overlay over a fork's unspent set.
///
/// The view accumulates the effects of rolling back and applying candidate sub-chains during
/// validation; a committable view is atomically persisted at fork switch. It also tracks the
/// block add/remove lists in canonical order so commit and update construction know which blocks
/// arrive and which are rolled back.
pub struct BlockView {
    fork: ForkId,
    committable: bool,
    map_tx: HashMap<TxId, Transaction>,
    map_unspent: HashMap<TxOutPoint, ViewUnspent>,
    tx_add: Vec<TxId>,
    tx_remove: Vec<TxId>,
    block_add: Vec<(BlockHash, BlockEx)>,
    block_remove: Vec<(BlockHash, BlockEx)>,
}

impl BlockView {
    pub fn new(fork: ForkId, committable: bool) -> Self {
        Self {
            fork,
            committable,
            map_tx: HashMap::new(),
            map_unspent: HashMap::new(),
            tx_add: Vec::new(),
            tx_remove: Vec::new(),
            block_add: Vec::new(),
            block_remove: Vec::new(),
        }
    }

    pub fn fork(&self) -> &ForkId {
        &self.fork
    }

    pub fn is_committable(&self) -> bool {
        self.committable
    }

    pub fn exists_tx(&self, txid: &TxId) -> bool {
        self.map_tx.contains_key(txid)
    }

    pub fn retrieve_tx(&self, txid: &TxId) -> Option<&Transaction> {
        self.map_tx.get(txid)
    }

    /// Resolve an output point: overlay first, persistent fork unspent second.
    pub fn retrieve_unspent<R: UnspentReader>(
        &self,
        reader: &R,
        point: &TxOutPoint,
    ) -> Result<Option<TxOut>, ChainError> {
        if let Some(entry) = self.map_unspent.get(point) {
            if entry.is_modified() {
                return Ok(entry.output.clone());
            }
        }
        reader.get_unspent(&self.fork, point)
    }

    /// Apply a transaction: spend each input (it must currently resolve) and add the outputs it
    /// creates. Mint transactions have no inputs; `dest_in`/`value_in` describe the resolved
    /// input side for everything else.
    pub fn add_tx<R: UnspentReader>(
        &mut self,
        reader: &R,
        txid: TxId,
        tx: &Transaction,
        dest_in: &Destination,
        value_in: i64,
    ) -> Result<(), ChainError> {
        for input in &tx.inputs {
            let spent = self
                .retrieve_unspent(reader, &input.prevout)?
                .ok_or(ChainError::TransactionInputInvalid)?;
            debug_assert!(spent.amount > 0);
            self.map_unspent.entry(input.prevout).or_default().disable();
        }

        if let Some(out0) = tx.get_output(0, dest_in, value_in) {
            if out0.amount > 0 || !out0.dest_to.is_null() {
                self.map_unspent
                    .entry(TxOutPoint::new(txid, 0))
                    .or_default()
                    .enable(out0);
            }
        }
        if let Some(out1) = tx.get_output(1, dest_in, value_in) {
            self.map_unspent
                .entry(TxOutPoint::new(txid, 1))
                .or_default()
                .enable(out1);
        }

        self.map_tx.insert(txid, tx.clone());
        self.tx_add.push(txid);
        Ok(())
    }

    /// Roll back a transaction using the input context recorded next to its block: re-enable the
    /// spent inputs and disable the outputs it created.
    pub fn remove_tx(&mut self, txid: TxId, tx: &Transaction, ctxt: &TxContext) {
        for (i, input) in tx.inputs.iter().enumerate() {
            let recorded = ctxt.inputs.get(i);
            let restored = TxOut {
                dest_to: ctxt.dest_in.clone(),
                amount: recorded.map(|r| r.amount).unwrap_or_default(),
                tx_time: recorded.map(|r| r.tx_time).unwrap_or_default(),
                lock_until: recorded.map(|r| r.lock_until).unwrap_or_default(),
            };
            self.map_unspent
                .entry(input.prevout)
                .or_default()
                .enable(restored);
        }

        self.map_unspent
            .entry(TxOutPoint::new(txid, 0))
            .or_default()
            .disable();
        if tx.get_change(ctxt.get_value_in()) > 0 && !ctxt.dest_in.is_null() {
            self.map_unspent
                .entry(TxOutPoint::new(txid, 1))
                .or_default()
                .disable();
        }

        self.map_tx.remove(&txid);
        self.tx_remove.push(txid);
    }

    /// Record an arriving block, oldest first.
    pub fn add_block(&mut self, hash: BlockHash, block: BlockEx) {
        self.block_add.push((hash, block));
    }

    /// Record a rolled-back block, newest first.
    pub fn remove_block(&mut self, hash: BlockHash, block: BlockEx) {
        self.block_remove.push((hash, block));
    }

    /// The transaction ids whose committed state this view changes.
    pub fn get_tx_updated(&self) -> HashSet<TxId> {
        self.tx_add.iter().chain(self.tx_remove.iter()).copied().collect()
    }

    pub fn get_tx_removed(&self) -> &[TxId] {
        &self.tx_remove
    }

    /// The net unspent delta of the view: points to insert with their outputs, and points to
    /// delete. Points whose enable/disable counts cancelled out are excluded.
    pub fn get_unspent_changes(&self) -> (Vec<(TxOutPoint, TxOut)>, Vec<TxOutPoint>) {
        let mut add_new = Vec::new();
        let mut remove = Vec::new();
        for (point, entry) in &self.map_unspent {
            if !entry.is_modified() {
                continue;
            }
            match &entry.output {
                Some(output) => add_new.push((*point, output.clone())),
                None => remove.push(*point),
            }
        }
        (add_new, remove)
    }

    /// The block add/remove lists: additions oldest first, removals newest first.
    pub fn get_block_changes(&self) -> (&[(BlockHash, BlockEx)], &[(BlockHash, BlockEx)]) {
        (&self.block_add, &self.block_remove)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use quasar_common_types::Hash256;

    use super::*;
    use crate::transactions::{TxIn, TxInContext};

    /// A fixed persistent unspent set standing in for the container.
    #[derive(Default)]
    struct FixedUnspent {
        map: BTreeMap<TxOutPoint, TxOut>,
    }

    impl UnspentReader for FixedUnspent {
        fn get_unspent(&self, _fork: &ForkId, point: &TxOutPoint) -> Result<Option<TxOut>, ChainError> {
            Ok(self.map.get(point).cloned())
        }
    }

    fn dest(n: u8) -> Destination {
        Destination::PubKey([n; 32])
    }

    fn spend_tx(prev: TxOutPoint, amount: i64, fee: i64) -> Transaction {
        Transaction {
            timestamp: 500,
            inputs: vec![TxIn { prevout: prev }],
            send_to: dest(2),
            amount,
            tx_fee: fee,
            ..Default::default()
        }
    }

    fn setup() -> (FixedUnspent, TxOutPoint) {
        let point = TxOutPoint::new(Hash256([1u8; 32]), 0);
        let mut persistent = FixedUnspent::default();
        persistent.map.insert(point, TxOut {
            dest_to: dest(1),
            amount: 1000,
            tx_time: 400,
            lock_until: 0,
        });
        (persistent, point)
    }

    #[test]
    fn spend_creates_outputs_and_consumes_input() {
        let (persistent, point) = setup();
        let mut view = BlockView::new(Hash256::zero(), true);

        let tx = spend_tx(point, 700, 100);
        let txid = tx.get_hash();
        view.add_tx(&persistent, txid, &tx, &dest(1), 1000).unwrap();

        // the input is gone, the send and change outputs resolve
        assert_eq!(view.retrieve_unspent(&persistent, &point).unwrap(), None);
        let send = view
            .retrieve_unspent(&persistent, &TxOutPoint::new(txid, 0))
            .unwrap()
            .unwrap();
        assert_eq!(send.amount, 700);
        let change = view
            .retrieve_unspent(&persistent, &TxOutPoint::new(txid, 1))
            .unwrap()
            .unwrap();
        assert_eq!(change.amount, 200);
        assert_eq!(change.dest_to, dest(1));

        let (add_new, remove) = view.get_unspent_changes();
        assert_eq!(add_new.len(), 2);
        assert_eq!(remove, vec![point]);
    }

    #[test]
    fn double_spend_in_view_is_rejected() {
        let (persistent, point) = setup();
        let mut view = BlockView::new(Hash256::zero(), true);

        let tx1 = spend_tx(point, 900, 100);
        view.add_tx(&persistent, tx1.get_hash(), &tx1, &dest(1), 1000)
            .unwrap();

        let mut tx2 = spend_tx(point, 500, 100);
        tx2.timestamp += 1;
        let err = view
            .add_tx(&persistent, tx2.get_hash(), &tx2, &dest(1), 1000)
            .unwrap_err();
        assert_eq!(err, ChainError::TransactionInputInvalid);
    }

    #[test]
    fn remove_tx_is_inverse_of_add_tx() {
        let (persistent, point) = setup();
        let mut view = BlockView::new(Hash256::zero(), true);

        let tx = spend_tx(point, 700, 100);
        let txid = tx.get_hash();
        view.add_tx(&persistent, txid, &tx, &dest(1), 1000).unwrap();

        let ctxt = TxContext {
            dest_in: dest(1),
            inputs: vec![TxInContext {
                amount: 1000,
                tx_time: 400,
                lock_until: 0,
            }],
        };
        view.remove_tx(txid, &tx, &ctxt);

        // everything cancelled: the commit delta is empty and the input resolves again
        let (add_new, remove) = view.get_unspent_changes();
        assert!(add_new.is_empty());
        assert!(remove.is_empty());
        let restored = view.retrieve_unspent(&persistent, &point).unwrap().unwrap();
        assert_eq!(restored.amount, 1000);
    }

    #[test]
    fn rollback_of_committed_tx_restores_input() {
        // the view rolls back a tx whose effects are already persistent
        let point = TxOutPoint::new(Hash256([1u8; 32]), 0);
        let tx = spend_tx(point, 700, 100);
        let txid = tx.get_hash();

        let mut persistent = FixedUnspent::default();
        persistent.map.insert(TxOutPoint::new(txid, 0), TxOut {
            dest_to: dest(2),
            amount: 700,
            tx_time: 500,
            lock_until: 0,
        });

        let mut view = BlockView::new(Hash256::zero(), true);
        let ctxt = TxContext {
            dest_in: dest(1),
            inputs: vec![TxInContext {
                amount: 1000,
                tx_time: 400,
                lock_until: 0,
            }],
        };
        view.remove_tx(txid, &tx, &ctxt);

        let restored = view.retrieve_unspent(&persistent, &point).unwrap().unwrap();
        assert_eq!(restored.amount, 1000);
        assert_eq!(restored.dest_to, dest(1));
        assert_eq!(
            view.retrieve_unspent(&persistent, &TxOutPoint::new(txid, 0)).unwrap(),
            None
        );

        let (add_new, remove) = view.get_unspent_changes();
        assert_eq!(add_new.len(), 1); // the restored input
        assert!(remove.iter().any(|p| *p == TxOutPoint::new(txid, 0)));
        assert!(remove.iter().any(|p| *p == TxOutPoint::new(txid, 1)));
    }

    #[test]
    fn tx_updated_covers_adds_and_removes() {
        let (persistent, point) = setup();
        let mut view = BlockView::new(Hash256::zero(), true);
        let tx = spend_tx(point, 700, 100);
        let txid = tx.get_hash();
        view.add_tx(&persistent, txid, &tx, &dest(1), 1000).unwrap();
        assert!(view.get_tx_updated().contains(&txid));
        assert!(view.exists_tx(&txid));
    }
}
