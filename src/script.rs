//! Script: an owned sequence of operations with precomputed analysis.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};
#[cfg(feature = "std")]
use std::vec::Vec;

use bitcoin::opcodes::{all, Opcode};

use crate::opcode::{is_invalid, opcode_to_positive};
use crate::operation::Operation;

pub(crate) const MAX_SCRIPT_SIZE: usize = 10_000;
pub(crate) const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
const MIN_WITNESS_PROGRAM: usize = 2;
const MAX_WITNESS_PROGRAM: usize = 40;
const MAX_NULL_DATA_PAYLOAD: usize = 80;

/// Structural template of a script, for sigop accounting and redemption
/// routing. Classification runs in a fixed priority order, so a script that
/// structurally matches several templates always resolves to the same one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptPattern {
    /// Output: `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`.
    PayKeyHash,
    /// Output: `OP_HASH160 <20> OP_EQUAL`.
    PayScriptHash,
    /// Output: `OP_0 <20>`.
    PayWitnessKeyHash,
    /// Output: `OP_0 <32>`.
    PayWitnessScriptHash,
    /// Output: any other `<version> <2..40>` witness program.
    PayWitness,
    /// Output: `OP_RETURN <0..80>`.
    PayNullData,
    /// Output: `<pubkey> OP_CHECKSIG`.
    PayPublicKey,
    /// Output: `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`, m <= n <= 20.
    PayMultisig,
    /// Input: `<sig> <pubkey>`.
    SignKeyHash,
    /// Input: push-only with a trailing embedded script.
    SignScriptHash,
    /// Input: `<sig>`.
    SignPublicKey,
    /// Input: `OP_0 <sig>...`.
    SignMultisig,
    NonStandard,
}

/// An ordered, owned sequence of operations.
///
/// All aggregate facts used repeatedly during validation (`is_valid`,
/// `is_push_only`, `is_unspendable`, serialized size) are computed once at
/// construction. The value is immutable afterwards, so it can be shared
/// freely between programs validating different inputs concurrently; the
/// code-separator cursor deliberately lives in the execution engine, not
/// here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    ops: Vec<Operation>,
    size: usize,
    valid: bool,
    push_only: bool,
}

impl Script {
    /// Parses operation bytes. With `prefix` set, a leading compact-size
    /// varint gives the byte count of the operations that follow; a malformed
    /// or mismatched prefix yields an invalid script rather than an error.
    pub fn from_data(bytes: &[u8], prefix: bool) -> Self {
        let body = if prefix {
            match read_compact_size(bytes) {
                Some((length, consumed)) if consumed + length == bytes.len() => &bytes[consumed..],
                _ => return Self::invalid(),
            }
        } else {
            bytes
        };

        let mut ops = Vec::new();
        let mut cursor = 0usize;
        while let Some(op) = Operation::read(body, &mut cursor) {
            ops.push(op);
        }
        Self::from_operations(ops)
    }

    /// Wraps an already-built operation sequence, computing the cached facts.
    pub fn from_operations(ops: Vec<Operation>) -> Self {
        let mut size = 0usize;
        let mut valid = true;
        let mut push_only = true;
        for op in &ops {
            size += op.serialized_size();
            valid &= op.is_valid();
            push_only &= op.is_push();
        }
        Self {
            ops,
            size,
            valid,
            push_only,
        }
    }

    fn invalid() -> Self {
        Self {
            ops: Vec::new(),
            size: 0,
            valid: false,
            push_only: true,
        }
    }

    /// Serializes the operations, optionally preceded by the compact-size
    /// byte count. Round-trips exactly with [`Script::from_data`].
    pub fn to_data(&self, prefix: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size(prefix));
        if prefix {
            write_compact_size(&mut out, self.size as u64);
        }
        for op in &self.ops {
            op.write(&mut out);
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_data(false)
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// False when any operation underflowed (or the length prefix was
    /// malformed).
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_push_only(&self) -> bool {
        self.push_only
    }

    /// Every operation is at most a relaxed push (BIP62 input-side rule).
    pub fn is_relaxed_push(&self) -> bool {
        self.ops.iter().all(Operation::is_relaxed_push)
    }

    /// Statically known to fail for every possible stack: malformed, leading
    /// OP_RETURN, an always-invalid opcode, or oversize.
    pub fn is_unspendable(&self) -> bool {
        !self.valid
            || self.size > MAX_SCRIPT_SIZE
            || self
                .ops
                .first()
                .is_some_and(|op| op.opcode() == all::OP_RETURN)
            || self.ops.iter().any(|op| is_invalid(op.opcode()))
    }

    pub fn serialized_size(&self, prefix: bool) -> usize {
        if prefix {
            self.size + compact_size_len(self.size as u64)
        } else {
            self.size
        }
    }

    /// Output-side template, first match in priority order.
    pub fn output_pattern(&self) -> ScriptPattern {
        if self.is_pay_key_hash() {
            return ScriptPattern::PayKeyHash;
        }
        if self.is_pay_script_hash() {
            return ScriptPattern::PayScriptHash;
        }
        if let Some((version, program)) = self.witness_program() {
            if version == 0 && program.len() == 20 {
                return ScriptPattern::PayWitnessKeyHash;
            }
            if version == 0 && program.len() == 32 {
                return ScriptPattern::PayWitnessScriptHash;
            }
            return ScriptPattern::PayWitness;
        }
        if self.is_pay_null_data() {
            return ScriptPattern::PayNullData;
        }
        if self.is_pay_public_key() {
            return ScriptPattern::PayPublicKey;
        }
        if self.is_pay_multisig() {
            return ScriptPattern::PayMultisig;
        }
        ScriptPattern::NonStandard
    }

    /// Input-side template, first match in priority order.
    pub fn input_pattern(&self) -> ScriptPattern {
        if self.is_sign_key_hash() {
            return ScriptPattern::SignKeyHash;
        }
        if self.is_sign_script_hash() {
            return ScriptPattern::SignScriptHash;
        }
        if self.is_sign_public_key() {
            return ScriptPattern::SignPublicKey;
        }
        if self.is_sign_multisig() {
            return ScriptPattern::SignMultisig;
        }
        ScriptPattern::NonStandard
    }

    /// Output classification first, falling back to input templates.
    pub fn pattern(&self) -> ScriptPattern {
        match self.output_pattern() {
            ScriptPattern::NonStandard => self.input_pattern(),
            pattern => pattern,
        }
    }

    pub fn is_pay_script_hash(&self) -> bool {
        self.ops.len() == 3
            && self.ops[0].opcode() == all::OP_HASH160
            && is_data_push(&self.ops[1], 20)
            && self.ops[2].opcode() == all::OP_EQUAL
    }

    /// BIP141 witness program: a version opcode followed by one canonical
    /// direct push of 2..=40 bytes.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        if self.ops.len() != 2 || !self.valid {
            return None;
        }
        let version = match self.ops[0].opcode() {
            all::OP_PUSHBYTES_0 => 0,
            op => opcode_to_positive(op)?,
        };
        let program = self.ops[1].data();
        let direct = self.ops[1].opcode().to_u8() as usize == program.len();
        if direct && (MIN_WITNESS_PROGRAM..=MAX_WITNESS_PROGRAM).contains(&program.len()) {
            Some((version, program))
        } else {
            None
        }
    }

    fn is_pay_key_hash(&self) -> bool {
        self.ops.len() == 5
            && self.ops[0].opcode() == all::OP_DUP
            && self.ops[1].opcode() == all::OP_HASH160
            && is_data_push(&self.ops[2], 20)
            && self.ops[3].opcode() == all::OP_EQUALVERIFY
            && self.ops[4].opcode() == all::OP_CHECKSIG
    }

    fn is_pay_null_data(&self) -> bool {
        match self.ops.as_slice() {
            [op] => op.opcode() == all::OP_RETURN,
            [first, push] => {
                first.opcode() == all::OP_RETURN
                    && push.is_valid()
                    && push.is_push()
                    && push.data().len() <= MAX_NULL_DATA_PAYLOAD
            }
            _ => false,
        }
    }

    fn is_pay_public_key(&self) -> bool {
        self.ops.len() == 2
            && is_public_key(&self.ops[0])
            && self.ops[1].opcode() == all::OP_CHECKSIG
    }

    fn is_pay_multisig(&self) -> bool {
        if self.ops.len() < 4 {
            return false;
        }
        let last = self.ops.len() - 1;
        if self.ops[last].opcode() != all::OP_CHECKMULTISIG {
            return false;
        }
        let Some(required) = opcode_to_positive(self.ops[0].opcode()) else {
            return false;
        };
        let Some(total) = opcode_to_positive(self.ops[last - 1].opcode()) else {
            return false;
        };
        let keys = &self.ops[1..last - 1];
        required <= total
            && total as usize <= MAX_PUBKEYS_PER_MULTISIG
            && keys.len() == total as usize
            && keys.iter().all(is_public_key)
    }

    fn is_sign_key_hash(&self) -> bool {
        self.ops.len() == 2 && is_endorsement(&self.ops[0]) && is_public_key(&self.ops[1])
    }

    fn is_sign_script_hash(&self) -> bool {
        self.ops.len() >= 2
            && self.is_relaxed_push()
            && self
                .ops
                .last()
                .is_some_and(|op| op.is_valid() && !op.data().is_empty())
    }

    fn is_sign_public_key(&self) -> bool {
        self.ops.len() == 1 && is_endorsement(&self.ops[0])
    }

    fn is_sign_multisig(&self) -> bool {
        self.ops.len() >= 2
            && self.ops[0].opcode() == all::OP_PUSHBYTES_0
            && self.ops[1..].iter().all(is_endorsement)
    }

    /// Legacy signature-operation count. `accurate` uses the preceding
    /// OP_1..OP_16 for CHECKMULTISIG where present (BIP16 counting); the
    /// inaccurate form charges the 20-key maximum.
    pub fn sigops(&self, accurate: bool) -> u32 {
        let mut total: u32 = 0;
        let mut last_op: Option<Opcode> = None;
        for op in &self.ops {
            match op.opcode() {
                all::OP_CHECKSIG | all::OP_CHECKSIGVERIFY | all::OP_CHECKSIGADD => {
                    total = total.saturating_add(1);
                }
                all::OP_CHECKMULTISIG | all::OP_CHECKMULTISIGVERIFY => {
                    let add = if accurate {
                        last_op
                            .and_then(opcode_to_positive)
                            .map(u32::from)
                            .unwrap_or(MAX_PUBKEYS_PER_MULTISIG as u32)
                    } else {
                        MAX_PUBKEYS_PER_MULTISIG as u32
                    };
                    total = total.saturating_add(add);
                }
                _ => {}
            }
            last_op = if op.data().is_empty() {
                Some(op.opcode())
            } else {
                None
            };
        }
        total
    }

    /// The embedded script a P2SH input redeems: the payload of the last
    /// push, re-parsed. Exactly one level of nesting; the caller never
    /// re-expands the result.
    pub fn embedded_script(&self) -> Option<Script> {
        if !self.valid || !self.push_only {
            return None;
        }
        let last = self.ops.last()?;
        if last.data().is_empty() {
            return None;
        }
        Some(Script::from_data(last.data(), false))
    }
}

fn is_data_push(op: &Operation, len: usize) -> bool {
    op.is_valid() && op.is_push() && op.data().len() == len
}

fn is_public_key(op: &Operation) -> bool {
    if !op.is_valid() || !op.is_push() {
        return false;
    }
    match op.data() {
        [0x02 | 0x03, ..] => op.data().len() == 33,
        [0x04, ..] => op.data().len() == 65,
        _ => false,
    }
}

/// A DER signature plus its trailing sighash byte: 9 to 73 bytes.
fn is_endorsement(op: &Operation) -> bool {
    op.is_valid() && op.is_push() && (9..=73).contains(&op.data().len())
}

pub(crate) fn read_compact_size(bytes: &[u8]) -> Option<(usize, usize)> {
    let first = *bytes.first()?;
    match first {
        0x00..=0xfc => Some((first as usize, 1)),
        0xfd => {
            let raw = bytes.get(1..3)?;
            Some((u16::from_le_bytes([raw[0], raw[1]]) as usize, 3))
        }
        0xfe => {
            let raw = bytes.get(1..5)?;
            Some((
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                5,
            ))
        }
        0xff => {
            let raw = bytes.get(1..9)?;
            let mut value = [0u8; 8];
            value.copy_from_slice(raw);
            usize::try_from(u64::from_le_bytes(value))
                .ok()
                .map(|v| (v, 9))
        }
    }
}

pub(crate) fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub(crate) fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
