//! Transaction parsing and data preparation utilities.
//!
//! Signature hashing over witness inputs reuses midstate hashes that are
//! identical for every input of the transaction. This module computes them
//! once per transaction so the per-input programs stay O(input size).

use bitcoin::{
    consensus,
    hashes::{sha256, sha256d, Hash, HashEngine},
    opcodes::all::OP_PUSHNUM_1,
    script::ScriptBuf,
    Amount, Script, Transaction, TxOut,
};

use crate::{Error, Utxo};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Holds the parsed transaction along with auxiliary data needed during script verification.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Parses a transaction from wire bytes and reserializes it to guarantee canonical encoding.
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let tx: Transaction =
            consensus::deserialize(tx_bytes).map_err(|_| Error::ERR_TX_DESERIALIZE)?;

        let canonical = consensus::serialize(&tx);
        if canonical.len() != tx_bytes.len() {
            return Err(Error::ERR_TX_SIZE_MISMATCH);
        }

        Ok(Self { tx })
    }

    /// Wraps an already-parsed transaction.
    pub fn from_transaction(tx: Transaction) -> Self {
        Self { tx }
    }

    /// Returns the fully parsed transaction.
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Ensures `input_index` points to an existing transaction input.
    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::ERR_TX_INDEX)
        } else {
            Ok(())
        }
    }

    /// Builds the precomputed data cache required for signature hashing.
    pub fn build_precomputed(
        &self,
        spent_outputs: Option<&SpentOutputs>,
        force: bool,
    ) -> PrecomputedTransactionData {
        PrecomputedTransactionData::new(&self.tx, spent_outputs, force)
    }
}

/// Owns the set of UTXOs referenced by a transaction when Taproot verification is required.
#[derive(Debug, Clone)]
pub struct SpentOutputs {
    txouts: Vec<TxOut>,
}

impl SpentOutputs {
    pub fn new(expected: usize, raw: &[Utxo<'_>]) -> Result<Self, Error> {
        if raw.len() != expected {
            return Err(Error::ERR_SPENT_OUTPUTS_MISMATCH);
        }

        let mut txouts = Vec::with_capacity(raw.len());
        for utxo in raw {
            txouts.push(TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: ScriptBuf::from_bytes(utxo.script_pubkey.to_vec()),
            });
        }

        Ok(Self { txouts })
    }

    pub fn txouts(&self) -> &[TxOut] {
        &self.txouts
    }
}

/// Per-transaction midstate hashes shared by BIP143 and BIP341 pre-images.
///
/// The single-SHA256 forms feed taproot signature hashes directly; segwit v0
/// uses their double-SHA256 counterparts.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedTransactionData {
    pub prevouts_single_hash: Option<sha256::Hash>,
    pub sequences_single_hash: Option<sha256::Hash>,
    pub outputs_single_hash: Option<sha256::Hash>,
    pub spent_amounts_single_hash: Option<sha256::Hash>,
    pub spent_scripts_single_hash: Option<sha256::Hash>,
    pub hash_prevouts: Option<sha256d::Hash>,
    pub hash_sequence: Option<sha256d::Hash>,
    pub hash_outputs: Option<sha256d::Hash>,
    pub bip143_segwit_ready: bool,
    pub bip341_taproot_ready: bool,
}

impl PrecomputedTransactionData {
    pub fn new(
        tx: &Transaction,
        spent_outputs: Option<&SpentOutputs>,
        force: bool,
    ) -> PrecomputedTransactionData {
        let mut data = PrecomputedTransactionData::default();

        let (mut uses_bip143, mut uses_bip341) = (force, force);

        for (idx, input) in tx.input.iter().enumerate() {
            if input.witness.is_empty() {
                continue;
            }

            if let Some(spent) = spent_outputs {
                if is_native_taproot(&spent.txouts[idx].script_pubkey) {
                    uses_bip341 = true;
                } else {
                    uses_bip143 = true;
                }
            } else {
                uses_bip143 = true;
            }

            if uses_bip143 && uses_bip341 {
                break;
            }
        }

        if uses_bip143 || uses_bip341 {
            data.prevouts_single_hash = Some(hash_prevouts_single(tx));
            data.sequences_single_hash = Some(hash_sequences_single(tx));
            data.outputs_single_hash = Some(hash_outputs_single(tx));
        }

        if uses_bip143 {
            data.hash_prevouts = data.prevouts_single_hash.map(double_sha);
            data.hash_sequence = data.sequences_single_hash.map(double_sha);
            data.hash_outputs = data.outputs_single_hash.map(double_sha);
            data.bip143_segwit_ready = true;
        }

        if uses_bip341 {
            if let Some(spent) = spent_outputs {
                data.spent_amounts_single_hash = Some(hash_spent_amounts_single(spent));
                data.spent_scripts_single_hash = Some(hash_spent_scripts_single(spent));
                data.bip341_taproot_ready = true;
            }
        }

        data
    }
}

pub(crate) fn double_sha(hash: sha256::Hash) -> sha256d::Hash {
    sha256d::Hash::hash(&hash.to_byte_array())
}

pub(crate) fn hash_prevouts_single(tx: &Transaction) -> sha256::Hash {
    hash_serialized(tx.input.iter().map(|input| &input.previous_output))
}

pub(crate) fn hash_sequences_single(tx: &Transaction) -> sha256::Hash {
    hash_serialized(tx.input.iter().map(|input| &input.sequence))
}

pub(crate) fn hash_outputs_single(tx: &Transaction) -> sha256::Hash {
    hash_serialized(tx.output.iter())
}

pub(crate) fn hash_spent_amounts_single(spent: &SpentOutputs) -> sha256::Hash {
    let mut engine = sha256::Hash::engine();
    for txout in spent.txouts() {
        let value = txout.value.to_sat() as i64;
        engine.input(&consensus::serialize(&value));
    }
    sha256::Hash::from_engine(engine)
}

pub(crate) fn hash_spent_scripts_single(spent: &SpentOutputs) -> sha256::Hash {
    hash_serialized(spent.txouts().iter().map(|txout| &txout.script_pubkey))
}

fn hash_serialized<'a, I, T>(items: I) -> sha256::Hash
where
    I: IntoIterator<Item = &'a T>,
    T: consensus::Encodable + 'a,
{
    let mut engine = sha256::Hash::engine();
    for item in items {
        engine.input(&consensus::serialize(item));
    }
    sha256::Hash::from_engine(engine)
}

fn is_native_taproot(script: &Script) -> bool {
    script.as_bytes().len() == 34 && script.as_bytes()[0] == OP_PUSHNUM_1.to_u8()
}
