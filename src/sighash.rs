//! Signature pre-image construction.
//!
//! Three generations of signature hash share one contract: given
//! `(transaction, input index, subscript, value, sighash flags)` produce a
//! deterministic, byte-exact digest. Divergence here breaks interoperability
//! silently, so each constructor follows its defining rules (the historical
//! serialization, BIP143, BIP341) field by field.
//!
//! Subscript preparation (code-separator trimming, signature-push deletion)
//! happens in the execution engine; these functions hash exactly what they
//! are given.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};
#[cfg(feature = "std")]
use std::vec::Vec;

use bitcoin::{
    consensus::Encodable,
    hashes::{sha256, sha256d, Hash, HashEngine},
    sighash::{LegacySighash, SegwitV0Sighash, TapSighash},
    Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};

use crate::error::ScriptError;
use crate::script::write_compact_size;
use crate::tx::{
    self, double_sha, PrecomputedTransactionData, SpentOutputs,
};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

const SIGHASH_OUTPUT_MASK: u32 = 0x1f;

/// Script dialect in force for one evaluation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SigVersion {
    Base,
    WitnessV0,
    Taproot,
}

fn base_type(sighash_type: u32) -> u32 {
    sighash_type & SIGHASH_OUTPUT_MASK
}

fn is_anyone_can_pay(sighash_type: u32) -> bool {
    sighash_type & SIGHASH_ANYONECANPAY != 0
}

/// Pre-segwit signature hash: a sighash-flag-modified copy of the spending
/// transaction, serialized and double-hashed with the flag appended.
///
/// `script_code` replaces the signed input's script; every other input's
/// script is emptied. The historical SIGHASH_SINGLE quirk (an input index
/// past the last output hashes to the constant 1) is reproduced exactly.
pub fn legacy_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: u32,
) -> LegacySighash {
    let base = base_type(sighash_type);
    if base == SIGHASH_SINGLE && input_index >= tx.output.len() {
        let mut one = [0u8; 32];
        one[0] = 1;
        return LegacySighash::from_byte_array(one);
    }

    let anyone = is_anyone_can_pay(sighash_type);
    let signed_script = ScriptBuf::from_bytes(script_code.to_vec());

    let input: Vec<TxIn> = if anyone {
        let mut txin = tx.input[input_index].clone();
        txin.script_sig = signed_script;
        txin.witness = Witness::new();
        vec![txin]
    } else {
        tx.input
            .iter()
            .enumerate()
            .map(|(idx, original)| {
                let mut txin = original.clone();
                txin.witness = Witness::new();
                txin.script_sig = if idx == input_index {
                    signed_script.clone()
                } else {
                    ScriptBuf::new()
                };
                if idx != input_index && matches!(base, SIGHASH_NONE | SIGHASH_SINGLE) {
                    txin.sequence = Sequence::ZERO;
                }
                txin
            })
            .collect()
    };

    let output: Vec<TxOut> = match base {
        SIGHASH_NONE => Vec::new(),
        SIGHASH_SINGLE => tx
            .output
            .iter()
            .take(input_index + 1)
            .enumerate()
            .map(|(idx, original)| {
                if idx == input_index {
                    original.clone()
                } else {
                    // The "null" placeholder output: value -1, empty script.
                    TxOut {
                        value: Amount::from_sat(u64::MAX),
                        script_pubkey: ScriptBuf::new(),
                    }
                }
            })
            .collect(),
        _ => tx.output.clone(),
    };

    let shadow = Transaction {
        version: tx.version,
        lock_time: tx.lock_time,
        input,
        output,
    };

    let mut engine = LegacySighash::engine();
    shadow
        .consensus_encode(&mut engine)
        .expect("engines never fail");
    engine.input(&sighash_type.to_le_bytes());
    LegacySighash::from_engine(engine)
}

/// BIP143 signature hash for version-0 witness programs.
///
/// The fixed-structure pre-image is hashed directly; the midstate hashes
/// shared across inputs come from [`PrecomputedTransactionData`], computed on
/// demand when the cache was built without witness data.
pub fn segwit_v0_signature_hash(
    tx: &Transaction,
    precomputed: &PrecomputedTransactionData,
    input_index: usize,
    script_code: &[u8],
    value: u64,
    sighash_type: u32,
) -> SegwitV0Sighash {
    let base = base_type(sighash_type);
    let anyone = is_anyone_can_pay(sighash_type);
    let zero = [0u8; 32];

    let mut engine = SegwitV0Sighash::engine();
    tx.version
        .consensus_encode(&mut engine)
        .expect("engines never fail");

    let hash_prevouts = if anyone {
        zero
    } else {
        precomputed
            .hash_prevouts
            .unwrap_or_else(|| double_sha(tx::hash_prevouts_single(tx)))
            .to_byte_array()
    };
    engine.input(&hash_prevouts);

    let hash_sequence = if !anyone && base != SIGHASH_NONE && base != SIGHASH_SINGLE {
        precomputed
            .hash_sequence
            .unwrap_or_else(|| double_sha(tx::hash_sequences_single(tx)))
            .to_byte_array()
    } else {
        zero
    };
    engine.input(&hash_sequence);

    let txin = &tx.input[input_index];
    txin.previous_output
        .consensus_encode(&mut engine)
        .expect("engines never fail");

    let mut prefixed_code = Vec::with_capacity(script_code.len() + 9);
    write_compact_size(&mut prefixed_code, script_code.len() as u64);
    prefixed_code.extend_from_slice(script_code);
    engine.input(&prefixed_code);

    engine.input(&value.to_le_bytes());
    txin.sequence
        .consensus_encode(&mut engine)
        .expect("engines never fail");

    let hash_outputs = if base != SIGHASH_NONE && base != SIGHASH_SINGLE {
        precomputed
            .hash_outputs
            .unwrap_or_else(|| double_sha(tx::hash_outputs_single(tx)))
            .to_byte_array()
    } else if base == SIGHASH_SINGLE && input_index < tx.output.len() {
        sha256d::Hash::hash(&bitcoin::consensus::serialize(&tx.output[input_index]))
            .to_byte_array()
    } else {
        zero
    };
    engine.input(&hash_outputs);

    tx.lock_time
        .consensus_encode(&mut engine)
        .expect("engines never fail");
    engine.input(&sighash_type.to_le_bytes());
    SegwitV0Sighash::from_engine(engine)
}

/// Extension data for script-path taproot spends: the tapleaf hash and the
/// position (opcode index) of the last executed OP_CODESEPARATOR.
pub type TapLeafContext = (bitcoin::taproot::TapLeafHash, u32);

/// BIP341 signature hash.
///
/// The sighash byte domain is closed: anything outside
/// `{0x00, 0x01, 0x02, 0x03, 0x81, 0x82, 0x83}` is an execution failure, as
/// is SIGHASH_SINGLE with no matching output.
pub fn taproot_signature_hash(
    tx: &Transaction,
    precomputed: &PrecomputedTransactionData,
    spent_outputs: &SpentOutputs,
    input_index: usize,
    sighash_byte: u8,
    annex: Option<&[u8]>,
    leaf: Option<TapLeafContext>,
) -> Result<TapSighash, ScriptError> {
    if !matches!(sighash_byte, 0x00..=0x03 | 0x81..=0x83) {
        return Err(ScriptError::SchnorrSigHashType);
    }
    let anyone = sighash_byte & SIGHASH_ANYONECANPAY as u8 != 0;
    let output_type = if sighash_byte == 0 {
        SIGHASH_ALL as u8
    } else {
        sighash_byte & 0x03
    };

    let mut engine = TapSighash::engine();
    engine.input(&[0u8]); // epoch
    engine.input(&[sighash_byte]);
    tx.version
        .consensus_encode(&mut engine)
        .expect("engines never fail");
    tx.lock_time
        .consensus_encode(&mut engine)
        .expect("engines never fail");

    if !anyone {
        let prevouts = precomputed
            .prevouts_single_hash
            .unwrap_or_else(|| tx::hash_prevouts_single(tx));
        let amounts = precomputed
            .spent_amounts_single_hash
            .unwrap_or_else(|| tx::hash_spent_amounts_single(spent_outputs));
        let scripts = precomputed
            .spent_scripts_single_hash
            .unwrap_or_else(|| tx::hash_spent_scripts_single(spent_outputs));
        let sequences = precomputed
            .sequences_single_hash
            .unwrap_or_else(|| tx::hash_sequences_single(tx));
        engine.input(&prevouts.to_byte_array());
        engine.input(&amounts.to_byte_array());
        engine.input(&scripts.to_byte_array());
        engine.input(&sequences.to_byte_array());
    }

    if output_type == SIGHASH_ALL as u8 {
        let outputs = precomputed
            .outputs_single_hash
            .unwrap_or_else(|| tx::hash_outputs_single(tx));
        engine.input(&outputs.to_byte_array());
    }

    let spend_type = u8::from(leaf.is_some()) * 2 + u8::from(annex.is_some());
    engine.input(&[spend_type]);

    if anyone {
        let txin = &tx.input[input_index];
        let prevout = &spent_outputs.txouts()[input_index];
        txin.previous_output
            .consensus_encode(&mut engine)
            .expect("engines never fail");
        engine.input(&prevout.value.to_sat().to_le_bytes());
        prevout
            .script_pubkey
            .consensus_encode(&mut engine)
            .expect("engines never fail");
        txin.sequence
            .consensus_encode(&mut engine)
            .expect("engines never fail");
    } else {
        engine.input(&(input_index as u32).to_le_bytes());
    }

    if let Some(annex_bytes) = annex {
        let mut prefixed = Vec::with_capacity(annex_bytes.len() + 9);
        write_compact_size(&mut prefixed, annex_bytes.len() as u64);
        prefixed.extend_from_slice(annex_bytes);
        engine.input(&sha256::Hash::hash(&prefixed).to_byte_array());
    }

    if output_type == SIGHASH_SINGLE as u8 {
        if input_index >= tx.output.len() {
            return Err(ScriptError::SchnorrSigHashType);
        }
        let single = sha256::Hash::hash(&bitcoin::consensus::serialize(&tx.output[input_index]));
        engine.input(&single.to_byte_array());
    }

    if let Some((leaf_hash, code_separator_pos)) = leaf {
        engine.input(leaf_hash.as_ref());
        engine.input(&[0u8]); // key version
        engine.input(&code_separator_pos.to_le_bytes());
    }

    Ok(TapSighash::from_engine(engine))
}

/// One-slot digest cache, scoped to a single program run.
///
/// Inside OP_CHECKMULTISIG every signature sharing a sighash byte covers the
/// same pre-image, so the digest is computed once. The slot is only consulted
/// when the subscript was not modified by signature deletion, since deletion
/// makes the pre-image signature-dependent.
#[derive(Default)]
pub(crate) struct SignatureHashCache {
    populated: bool,
    sigversion: Option<SigVersion>,
    sighash_type: u32,
    code_separator: usize,
    digest: [u8; 32],
}

impl SignatureHashCache {
    pub(crate) fn lookup(
        &self,
        sigversion: SigVersion,
        sighash_type: u32,
        code_separator: usize,
    ) -> Option<[u8; 32]> {
        if self.populated
            && self.sigversion == Some(sigversion)
            && self.sighash_type == sighash_type
            && self.code_separator == code_separator
        {
            Some(self.digest)
        } else {
            None
        }
    }

    pub(crate) fn store(
        &mut self,
        sigversion: SigVersion,
        sighash_type: u32,
        code_separator: usize,
        digest: [u8; 32],
    ) {
        self.populated = true;
        self.sigversion = Some(sigversion);
        self.sighash_type = sighash_type;
        self.code_separator = code_separator;
        self.digest = digest;
    }
}
