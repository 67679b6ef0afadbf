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

use quasar_core::{
    consensus::COIN,
    error::ChainError,
    test_helpers::{
        add_many_chained_blocks,
        create_cert_tx,
        create_new_blockchain,
        create_transfer,
        dest_of,
        mine_block,
        test_key,
    },
    transactions::TxOutPoint,
};

mod genesis_initialization {
    use super::*;

    #[test]
    fn it_seeds_the_genesis_fork() {
        let tc = create_new_blockchain();
        let fork = tc.genesis_hash;

        let (last, height, _) = tc.chain.get_last_block(&fork).unwrap().unwrap();
        assert_eq!(last, fork);
        assert_eq!(height, 0);
        assert_eq!(tc.chain.get_block_count(&fork).unwrap(), 1);

        let statuses = tc.chain.get_fork_status().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].fork_id, fork);
        assert!(statuses[0].parent_id.is_zero());
    }

    #[test]
    fn re_adding_genesis_returns_already_have() {
        let tc = create_new_blockchain();
        let genesis = tc.chain.get_block(&tc.genesis_hash).unwrap();
        assert_eq!(
            tc.chain.add_new_block(&genesis).unwrap_err(),
            ChainError::AlreadyHave
        );
    }
}

mod linear_extension {
    use super::*;

    #[test]
    fn five_blocks_extend_the_genesis_fork() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let fork = tc.genesis_hash;

        let mut updates = Vec::new();
        let mut prev = fork;
        let mut blocks = Vec::new();
        for _ in 0..5 {
            let block = mine_block(&tc, &prev, &miner, Vec::new()).unwrap();
            prev = block.get_hash();
            updates.push(tc.chain.add_new_block(&block).unwrap());
            blocks.push(block);
        }

        let (last, height, _) = tc.chain.get_last_block(&fork).unwrap().unwrap();
        assert_eq!(last, blocks[4].get_hash());
        assert_eq!(height, 5);
        assert_eq!(tc.chain.get_block_count(&fork).unwrap(), 6);

        // each ingest emitted exactly one appended block and no removals
        for (i, update) in updates.iter().enumerate() {
            assert!(!update.is_null());
            assert_eq!(update.block_add_new.len(), 1);
            assert!(update.block_remove.is_empty());
            assert_eq!(update.block_add_new[0].block.get_hash(), blocks[i].get_hash());
            assert_eq!(update.last_block_height, i as u32 + 1);
        }

        // trust grows strictly along the chain
        let genesis_index = tc.chain.container().retrieve_index(&fork).unwrap().unwrap();
        let tip_index = tc.chain.container().retrieve_index(&last).unwrap().unwrap();
        assert!(tip_index.chain_trust > genesis_index.chain_trust);
    }

    #[test]
    fn duplicate_ingest_leaves_state_unchanged() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let blocks = add_many_chained_blocks(&tc, 2, &miner).unwrap();

        let count_before = tc.chain.get_block_count(&tc.genesis_hash).unwrap();
        assert_eq!(
            tc.chain.add_new_block(&blocks[1]).unwrap_err(),
            ChainError::AlreadyHave
        );
        assert_eq!(tc.chain.get_block_count(&tc.genesis_hash).unwrap(), count_before);
    }

    #[test]
    fn money_supply_accumulates_block_mint() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let blocks = add_many_chained_blocks(&tc, 3, &miner).unwrap();

        let genesis_supply = tc
            .chain
            .container()
            .retrieve_index(&tc.genesis_hash)
            .unwrap()
            .unwrap()
            .money_supply;
        let mut expected = genesis_supply;
        for block in &blocks {
            expected += block.get_block_mint();
            let index = tc
                .chain
                .container()
                .retrieve_index(&block.get_hash())
                .unwrap()
                .unwrap();
            assert_eq!(index.money_supply, expected);
        }
    }
}

mod fork_switch {
    use super::*;

    #[test]
    fn longer_chain_wins_and_reports_the_reorg() {
        let tc = create_new_blockchain();
        let miner_a = test_key(1);
        let miner_b = test_key(2);
        let fork = tc.genesis_hash;

        // chain A: G -> A1 -> A2 becomes the active chain
        let a1 = mine_block(&tc, &fork, &miner_a, Vec::new()).unwrap();
        tc.chain.add_new_block(&a1).unwrap();
        let a2 = mine_block(&tc, &a1.get_hash(), &miner_a, Vec::new()).unwrap();
        tc.chain.add_new_block(&a2).unwrap();
        assert_eq!(tc.chain.get_last_block(&fork).unwrap().unwrap().0, a2.get_hash());

        // competing chain B: G -> B1 -> B2 -> B3 with more accumulated trust
        let b1 = mine_block(&tc, &fork, &miner_b, Vec::new()).unwrap();
        let update = tc.chain.add_new_block(&b1).unwrap();
        assert!(update.is_null(), "a shorter side chain must not switch the tip");
        assert_eq!(tc.chain.get_last_block(&fork).unwrap().unwrap().0, a2.get_hash());

        let b2 = mine_block(&tc, &b1.get_hash(), &miner_b, Vec::new()).unwrap();
        let update = tc.chain.add_new_block(&b2).unwrap();
        assert!(update.is_null(), "equal trust must keep the incumbent tip");
        assert_eq!(tc.chain.get_last_block(&fork).unwrap().unwrap().0, a2.get_hash());

        let b3 = mine_block(&tc, &b2.get_hash(), &miner_b, Vec::new()).unwrap();
        let update = tc.chain.add_new_block(&b3).unwrap();
        assert!(!update.is_null());

        // one update carrying the whole reorganization, in order
        let added: Vec<_> = update
            .block_add_new
            .iter()
            .map(|b| b.block.get_hash())
            .collect();
        let removed: Vec<_> = update
            .block_remove
            .iter()
            .map(|b| b.block.get_hash())
            .collect();
        assert_eq!(added, vec![b1.get_hash(), b2.get_hash(), b3.get_hash()]);
        assert_eq!(removed, vec![a2.get_hash(), a1.get_hash()]);

        let (last, height, _) = tc.chain.get_last_block(&fork).unwrap().unwrap();
        assert_eq!(last, b3.get_hash());
        assert_eq!(height, 3);

        // the unspent set reflects chain B: B-chain mints are spendable, A-chain mints are not
        use quasar_core::chain_storage::UnspentReader;
        let b3_mint = TxOutPoint::new(b3.tx_mint.get_hash(), 0);
        assert!(tc.chain.container().get_unspent(&fork, &b3_mint).unwrap().is_some());
        let a2_mint = TxOutPoint::new(a2.tx_mint.get_hash(), 0);
        assert!(tc.chain.container().get_unspent(&fork, &a2_mint).unwrap().is_none());
    }
}

mod transaction_scenarios {
    use super::*;

    #[test]
    fn transfer_moves_value_and_pays_change() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let receiver = test_key(2);
        let fork = tc.genesis_hash;

        let genesis_mint = tc.chain.get_block(&fork).unwrap().tx_mint;
        let tx = create_transfer(
            &tc.genesis_key,
            vec![TxOutPoint::new(genesis_mint.get_hash(), 0)],
            dest_of(&receiver),
            250 * COIN,
            100,
            genesis_mint.timestamp + 1,
        );
        let txid = tx.get_hash();

        let block = mine_block(&tc, &fork, &miner, vec![tx]).unwrap();
        let update = tc.chain.add_new_block(&block).unwrap();
        assert!(update.tx_update.contains(&txid));

        use quasar_core::chain_storage::UnspentReader;
        let send = tc
            .chain
            .container()
            .get_unspent(&fork, &TxOutPoint::new(txid, 0))
            .unwrap()
            .unwrap();
        assert_eq!(send.amount, 250 * COIN);
        let change = tc
            .chain
            .container()
            .get_unspent(&fork, &TxOutPoint::new(txid, 1))
            .unwrap()
            .unwrap();
        assert_eq!(change.dest_to, dest_of(&tc.genesis_key));
        // the spent genesis output is gone
        assert!(tc
            .chain
            .container()
            .get_unspent(&fork, &TxOutPoint::new(genesis_mint.get_hash(), 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn conflicting_inputs_within_a_block_are_rejected() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let fork = tc.genesis_hash;

        let genesis_mint = tc.chain.get_block(&fork).unwrap().tx_mint;
        let point = TxOutPoint::new(genesis_mint.get_hash(), 0);
        let tx1 = create_transfer(
            &tc.genesis_key,
            vec![point],
            dest_of(&test_key(2)),
            100 * COIN,
            100,
            genesis_mint.timestamp + 1,
        );
        let tx2 = create_transfer(
            &tc.genesis_key,
            vec![point],
            dest_of(&test_key(3)),
            200 * COIN,
            100,
            genesis_mint.timestamp + 1,
        );

        let block = mine_block(&tc, &fork, &miner, vec![tx1, tx2]).unwrap();
        let err = tc.chain.add_new_block(&block).unwrap_err();
        assert!(
            matches!(
                err,
                ChainError::TransactionConflictingInput | ChainError::TransactionInputInvalid
            ),
            "unexpected error {err:?}"
        );
        // the block was not committed
        assert_eq!(tc.chain.get_last_block(&fork).unwrap().unwrap().0, fork);
    }

    #[test]
    fn unsigned_spend_is_rejected() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let fork = tc.genesis_hash;

        let genesis_mint = tc.chain.get_block(&fork).unwrap().tx_mint;
        let mut tx = create_transfer(
            &tc.genesis_key,
            vec![TxOutPoint::new(genesis_mint.get_hash(), 0)],
            dest_of(&test_key(2)),
            100 * COIN,
            100,
            genesis_mint.timestamp + 1,
        );
        tx.sig_data = vec![0u8; 64];

        let block = mine_block(&tc, &fork, &miner, vec![tx]).unwrap();
        assert_eq!(
            tc.chain.add_new_block(&block).unwrap_err(),
            ChainError::TransactionSignatureInvalid
        );
    }

    #[test]
    fn excessive_mint_amount_is_rejected() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let fork = tc.genesis_hash;

        let mut block = mine_block(&tc, &fork, &miner, Vec::new()).unwrap();
        block.tx_mint.amount += 1;
        // re-sign: the mint is part of the block id
        use ed25519_dalek::Signer;
        block.sig = miner.sign(block.get_hash().as_bytes()).to_bytes().to_vec();

        assert_eq!(
            tc.chain.add_new_block(&block).unwrap_err(),
            ChainError::BlockTransactionsInvalid
        );
    }
}

mod cert_window {
    use super::*;

    #[test]
    fn over_count_is_rejected_with_certtx_out_of_bound() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let holder = test_key(2);
        let delegate = test_key(3);
        let fork = tc.genesis_hash;
        let genesis_mint = tc.chain.get_block(&fork).unwrap().tx_mint;
        let ts = genesis_mint.timestamp + 1;

        // fund the holder with two spendable outputs
        let t1 = create_transfer(
            &tc.genesis_key,
            vec![TxOutPoint::new(genesis_mint.get_hash(), 0)],
            dest_of(&holder),
            100 * COIN,
            100,
            ts,
        );
        let t2 = create_transfer(
            &tc.genesis_key,
            vec![TxOutPoint::new(t1.get_hash(), 1)],
            dest_of(&holder),
            100 * COIN,
            100,
            ts,
        );
        let b1 = mine_block(&tc, &fork, &miner, vec![t1.clone(), t2.clone()]).unwrap();
        tc.chain.add_new_block(&b1).unwrap();

        // two enrollments for the delegate, anchored at height 1; the window allows at most
        // min(enroll_interval + 2, height) per destination
        let c1 = create_cert_tx(
            &holder,
            TxOutPoint::new(t1.get_hash(), 0),
            dest_of(&delegate),
            50 * COIN,
            300,
            b1.get_hash(),
            ts + 1,
        );
        let c2 = create_cert_tx(
            &holder,
            TxOutPoint::new(t2.get_hash(), 0),
            dest_of(&delegate),
            50 * COIN,
            300,
            b1.get_hash(),
            ts + 1,
        );
        let b2 = mine_block(&tc, &b1.get_hash(), &miner, vec![c1.clone(), c2]).unwrap();
        tc.chain.add_new_block(&b2).unwrap();

        // a further enrollment for the same delegate exceeds the remaining allowance
        let c3 = create_cert_tx(
            &holder,
            TxOutPoint::new(c1.get_hash(), 1),
            dest_of(&delegate),
            10 * COIN,
            300,
            b2.get_hash(),
            ts + 2,
        );
        let b3 = mine_block(&tc, &b2.get_hash(), &miner, vec![c3]).unwrap();
        assert_eq!(
            tc.chain.add_new_block(&b3).unwrap_err(),
            ChainError::BlockCertTxOutOfBound
        );
    }

    #[test]
    fn enrollment_window_aggregates_recent_certs() {
        let tc = create_new_blockchain();
        let miner = test_key(1);
        let holder = test_key(2);
        let delegate = test_key(3);
        let fork = tc.genesis_hash;
        let genesis_mint = tc.chain.get_block(&fork).unwrap().tx_mint;
        let ts = genesis_mint.timestamp + 1;
        let enroll_interval = tc.chain.protocol().constants().enroll_interval;

        let t1 = create_transfer(
            &tc.genesis_key,
            vec![TxOutPoint::new(genesis_mint.get_hash(), 0)],
            dest_of(&holder),
            100 * COIN,
            100,
            ts,
        );
        let b1 = mine_block(&tc, &fork, &miner, vec![t1.clone()]).unwrap();
        tc.chain.add_new_block(&b1).unwrap();

        let cert = create_cert_tx(
            &holder,
            TxOutPoint::new(t1.get_hash(), 0),
            dest_of(&delegate),
            50 * COIN,
            300,
            b1.get_hash(),
            ts + 1,
        );
        let b2 = mine_block(&tc, &b1.get_hash(), &miner, vec![cert]).unwrap();
        tc.chain.add_new_block(&b2).unwrap();

        // below the enrollment interval the snapshot is empty
        let early = tc.chain.get_block_delegate_enrolled(&b2.get_hash()).unwrap();
        assert!(early.is_empty());

        // grow the chain so the window covers the enrollment block
        let blocks = add_many_chained_blocks(&tc, enroll_interval as usize - 2, &miner).unwrap();
        let at = blocks.last().unwrap().get_hash();
        let enrolled = tc.chain.get_block_delegate_enrolled(&at).unwrap();
        assert_eq!(enrolled.map_weight.len(), 1);
        assert!(enrolled.map_weight.contains_key(&dest_of(&delegate)));
        assert_eq!(enrolled.vec_amount[0].1, 50 * COIN);

        // once the window slides past the enrollment, it drops out
        add_many_chained_blocks(&tc, enroll_interval as usize, &miner).unwrap();
        let (tip, _, _) = tc.chain.get_last_block(&fork).unwrap().unwrap();
        let later = tc.chain.get_block_delegate_enrolled(&tip).unwrap();
        assert!(later.is_empty());
    }
}
