//! Program: the per-input execution engine.
//!
//! A program is a single-use context binding one spend (transaction, input
//! index, spent output, witness) to an active-flags rule set. It owns the
//! three stacks and all run accounting; in particular the code-separator
//! cursor is local to each run and threaded into sighash construction, so
//! scripts can be shared between concurrently validating programs.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};
#[cfg(all(feature = "std", not(feature = "external-secp")))]
use std::sync::OnceLock;
#[cfg(feature = "std")]
use std::vec::Vec;

use core::mem;

use bitcoin::{
    absolute::LOCK_TIME_THRESHOLD,
    consensus::Encodable,
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash, HashEngine},
    key::{TapTweak, UntweakedPublicKey},
    opcodes::{all, Opcode},
    secp256k1::{
        self, ecdsa::Signature as EcdsaSignature, schnorr::Signature as SchnorrSignature, Message,
        Parity, PublicKey, Secp256k1, XOnlyPublicKey,
    },
    taproot::{
        TapLeafHash, TapNodeHash, TAPROOT_ANNEX_PREFIX, TAPROOT_CONTROL_BASE_SIZE,
        TAPROOT_CONTROL_MAX_SIZE, TAPROOT_CONTROL_NODE_SIZE, TAPROOT_LEAF_MASK,
        TAPROOT_LEAF_TAPSCRIPT,
    },
    Sequence, Witness,
};

use crate::error::ScriptError;
use crate::opcode::{self, is_payload};
use crate::operation::Operation;
use crate::script::{Script, MAX_PUBKEYS_PER_MULTISIG, MAX_SCRIPT_SIZE};
use crate::sighash::{
    legacy_signature_hash, segwit_v0_signature_hash, taproot_signature_hash, SigVersion,
    SignatureHashCache,
};
use crate::stack::{
    Stack, StackValue, MAX_SCRIPT_ELEMENT_SIZE, MAX_STACK_SIZE, SCRIPTNUM_MAX_LEN,
    SCRIPTNUM_MAX_LEN_EXTENDED,
};
use crate::tx::{PrecomputedTransactionData, SpentOutputs, TransactionContext};
use crate::{
    Error, ScriptFlags, VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_CLEANSTACK,
    VERIFY_DERSIG, VERIFY_DISABLED_UNEXECUTED, VERIFY_DISCOURAGE_OP_SUCCESS,
    VERIFY_DISCOURAGE_UPGRADABLE_NOPS, VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE,
    VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION, VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM,
    VERIFY_LOW_S, VERIFY_MINIMALDATA, VERIFY_MINIMALIF, VERIFY_NULLDUMMY, VERIFY_NULLFAIL,
    VERIFY_P2SH, VERIFY_SIGPUSHONLY, VERIFY_STRICTENC, VERIFY_TAPROOT, VERIFY_WITNESS,
    VERIFY_WITNESS_PUBKEYTYPE,
};

const MAX_OPS_PER_SCRIPT: usize = 201;
/// Per-evaluation signature-operation ceiling (the block-level budget; no
/// tighter per-script consensus bound exists).
const MAX_EVALUATION_SIGOPS: u32 = 80_000;
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;
const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;
const VALIDATION_WEIGHT_PER_SIGOP_PASSED: i64 = 50;
const VALIDATION_WEIGHT_OFFSET: i64 = 50;

#[cfg(all(feature = "external-secp", feature = "std"))]
type VerificationContext = Secp256k1<secp256k1::All>;
#[cfg(not(all(feature = "external-secp", feature = "std")))]
type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(all(feature = "std", not(feature = "external-secp")))]
static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(all(feature = "std", feature = "external-secp"))]
    {
        // `bitcoin::secp256k1` re-exports the `global` module when the upstream
        // `secp256k1` crate is built with the `global-context` feature, so we can
        // piggyback on that singleton instead of creating ad-hoc contexts.
        f(&*bitcoin::secp256k1::global::SECP256K1)
    }
    #[cfg(all(feature = "std", not(feature = "external-secp")))]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
    #[cfg(not(feature = "std"))]
    {
        let ctx = Secp256k1::verification_only();
        f(&ctx)
    }
}

/// Taproot spend context accumulated before and during tapscript execution.
#[derive(Default)]
struct ExecutionData {
    annex: Option<Vec<u8>>,
    tapleaf_hash: Option<TapLeafHash>,
    code_separator_pos: Option<u32>,
    validation_weight_left: Option<i64>,
}

struct ControlBlock<'a> {
    bytes: &'a [u8],
}

impl<'a> ControlBlock<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, ScriptError> {
        if bytes.len() < TAPROOT_CONTROL_BASE_SIZE
            || bytes.len() > TAPROOT_CONTROL_MAX_SIZE
            || (bytes.len() - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE != 0
        {
            return Err(ScriptError::TaprootWrongControlSize);
        }
        Ok(Self { bytes })
    }

    fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn leaf_version(&self) -> u8 {
        self.bytes[0] & TAPROOT_LEAF_MASK
    }
}

/// Input-specific data required to run a program.
pub struct SpendContext<'script> {
    pub script_pubkey: &'script [u8],
    pub spent_outputs: Option<SpentOutputs>,
    pub amount: u64,
    pub has_amount: bool,
}

impl<'script> SpendContext<'script> {
    pub fn new(
        script_pubkey: &'script [u8],
        spent_outputs: Option<SpentOutputs>,
        amount: u64,
        has_amount: bool,
    ) -> Self {
        Self {
            script_pubkey,
            spent_outputs,
            amount,
            has_amount,
        }
    }
}

/// Single-use execution context for one transaction input.
pub struct Program<'tx> {
    flags: ScriptFlags,
    tx_ctx: &'tx TransactionContext,
    precomputed: PrecomputedTransactionData,
    input_index: usize,
    input_script: Script,
    output_script: Script,
    spent_outputs: Option<SpentOutputs>,
    amount: u64,
    stack: Stack,
    branches: Vec<bool>,
    op_count: usize,
    sigops: u32,
    sighash_cache: SignatureHashCache,
    exec_data: ExecutionData,
    had_witness: bool,
}

impl<'tx> Program<'tx> {
    pub fn new(
        tx_ctx: &'tx TransactionContext,
        precomputed: PrecomputedTransactionData,
        input_index: usize,
        spend: SpendContext<'_>,
        flags: ScriptFlags,
    ) -> Result<Self, Error> {
        if flags.requires_spent_outputs() && spend.spent_outputs.is_none() {
            return Err(Error::ERR_SPENT_OUTPUTS_REQUIRED);
        }
        let txin = &tx_ctx.tx().input[input_index];
        if flags.bits() & VERIFY_WITNESS != 0 && !txin.witness.is_empty() && !spend.has_amount {
            return Err(Error::ERR_AMOUNT_REQUIRED);
        }

        Ok(Self {
            flags,
            tx_ctx,
            precomputed,
            input_index,
            input_script: Script::from_data(txin.script_sig.as_bytes(), false),
            output_script: Script::from_data(spend.script_pubkey, false),
            spent_outputs: spend.spent_outputs,
            amount: spend.amount,
            stack: Stack::new(),
            branches: Vec::new(),
            op_count: 0,
            sigops: 0,
            sighash_cache: SignatureHashCache::default(),
            exec_data: ExecutionData::default(),
            had_witness: false,
        })
    }

    /// Runs the spend to a verdict. Deterministic, never panics, never
    /// retries; the first violated invariant is the result.
    pub fn verify(&mut self) -> Result<(), ScriptError> {
        self.exec_data = ExecutionData::default();
        self.had_witness = false;
        self.sigops = 0;
        self.add_sigops(self.input_script.sigops(false))?;
        self.add_sigops(self.output_script.sigops(true))?;

        let txin = &self.tx_ctx.tx().input[self.input_index];
        let witness_enabled = self.flags.bits() & VERIFY_WITNESS != 0;
        let p2sh_enabled = self.flags.bits() & VERIFY_P2SH != 0;
        let spent_is_p2sh = self.output_script.is_pay_script_hash();

        if witness_enabled
            && spent_is_p2sh
            && !txin.witness.is_empty()
            && !is_canonical_single_push(&self.input_script)
        {
            return Err(ScriptError::WitnessMalleatedP2SH);
        }
        if self.flags.bits() & VERIFY_SIGPUSHONLY != 0 && !self.input_script.is_push_only() {
            return Err(ScriptError::SigPushOnly);
        }

        self.stack = Stack::new();
        let input_script = self.input_script.clone();
        self.run_on_main_stack(&input_script, SigVersion::Base)?;

        let mut p2sh_stack = if p2sh_enabled && spent_is_p2sh {
            Some(self.stack.clone())
        } else {
            None
        };

        let output_script = self.output_script.clone();
        self.run_on_main_stack(&output_script, SigVersion::Base)?;

        if witness_enabled {
            if let Some((version, program)) = output_script.witness_program() {
                self.had_witness = true;
                if input_script.serialized_size(false) != 0 {
                    return Err(ScriptError::WitnessMalleated);
                }
                self.execute_witness_program(version, program, &txin.witness)?;
                let mut stack = Stack::new();
                stack.push(StackValue::Bool(true))?;
                self.stack = stack;
            }
        }

        if p2sh_enabled && spent_is_p2sh {
            if !self.input_script.is_push_only() {
                return Err(ScriptError::SigPushOnly);
            }

            let mut stack_copy = p2sh_stack.take().expect("preserved above");
            if stack_copy.is_empty() {
                return Err(ScriptError::EvalFalse);
            }

            let redeem_bytes = stack_copy.pop()?.into_bytes();
            let redeem_script = Script::from_data(&redeem_bytes, false);
            self.run_script(&mut stack_copy, &redeem_script, SigVersion::Base)?;
            if !stack_copy.last().is_some_and(StackValue::to_bool) {
                return Err(ScriptError::EvalFalse);
            }

            if witness_enabled {
                if let Some((version, program)) = redeem_script.witness_program() {
                    self.had_witness = true;
                    let expected = Operation::from_data(&redeem_bytes, true).to_bytes();
                    if self.input_script.to_bytes() != expected {
                        return Err(ScriptError::WitnessMalleatedP2SH);
                    }
                    self.execute_witness_program(version, program, &txin.witness)?;
                    stack_copy = Stack::new();
                    stack_copy.push(StackValue::Bool(true))?;
                }
            }

            self.add_sigops(redeem_script.sigops(true))?;
            self.stack = stack_copy;
        }

        if !self.stack.last().is_some_and(StackValue::to_bool) {
            return Err(ScriptError::EvalFalse);
        }

        if witness_enabled && !self.had_witness && !txin.witness.is_empty() {
            return Err(ScriptError::WitnessUnexpected);
        }

        if self.flags.bits() & VERIFY_CLEANSTACK != 0 {
            self.require_clean_stack()?;
        }
        Ok(())
    }

    /// Signature operations charged so far, legacy counting.
    pub fn sigop_count(&self) -> u32 {
        self.sigops
    }

    fn add_sigops(&mut self, count: u32) -> Result<(), ScriptError> {
        self.sigops = self
            .sigops
            .checked_add(count)
            .ok_or(ScriptError::SigopBudget)?;
        if self.sigops > MAX_EVALUATION_SIGOPS {
            return Err(ScriptError::SigopBudget);
        }
        Ok(())
    }

    fn add_ops(&mut self, count: usize) -> Result<(), ScriptError> {
        self.op_count += count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            Err(ScriptError::OpCount)
        } else {
            Ok(())
        }
    }

    fn run_on_main_stack(
        &mut self,
        script: &Script,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        let mut stack = mem::take(&mut self.stack);
        let result = self.run_script(&mut stack, script, sigversion);
        self.stack = stack;
        result
    }

    /// Fetch-decode-execute over one script. The conditional stack, the op
    /// counter and the code-separator cursor reset per run; the alternate
    /// stack never outlives it.
    fn run_script(
        &mut self,
        stack: &mut Stack,
        script: &Script,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        if script.ops().is_empty() {
            return Ok(());
        }
        if script.serialized_size(false) > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }

        self.branches.clear();
        self.op_count = 0;
        let mut altstack = Stack::new();
        let mut code_separator = 0usize;
        let require_minimal = self.flags.bits() & VERIFY_MINIMALDATA != 0;
        let disabled_unexecuted = self.flags.bits() & VERIFY_DISABLED_UNEXECUTED != 0;

        for index in 0..script.ops().len() {
            let op = &script.ops()[index];
            let opcode = op.opcode();
            let executing = self.branches.iter().all(|&branch| branch);

            if op.is_underflow() {
                return Err(ScriptError::BadOpcode);
            }
            if op.data().len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
            if op.is_counted() && sigversion != SigVersion::Taproot {
                self.add_ops(1)?;
            }
            if sigversion != SigVersion::Taproot
                && op.is_disabled()
                && (executing || disabled_unexecuted)
            {
                return Err(ScriptError::DisabledOpcode);
            }
            if opcode::is_invalid_unexecuted(opcode) {
                return Err(ScriptError::BadOpcode);
            }

            if op.is_conditional() {
                self.conditional(stack, opcode, executing, sigversion)?;
            } else if executing {
                if op.is_push() {
                    if is_payload(opcode) && require_minimal && !op.is_minimal_push() {
                        return Err(ScriptError::MinimalData);
                    }
                    stack.push(push_value(op))?;
                } else if opcode == all::OP_CODESEPARATOR {
                    code_separator = index + 1;
                    if sigversion == SigVersion::Taproot {
                        self.exec_data.code_separator_pos = Some(index as u32);
                    }
                } else {
                    self.execute(stack, &mut altstack, op, script, code_separator, sigversion)?;
                }
            }

            if stack.len() + altstack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
        }

        if !self.branches.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn conditional(
        &mut self,
        stack: &mut Stack,
        opcode: Opcode,
        executing: bool,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        match opcode {
            all::OP_IF | all::OP_NOTIF => {
                let mut value = false;
                if executing {
                    let condition = stack
                        .pop()
                        .map_err(|_| ScriptError::UnbalancedConditional)?;
                    let enforce_minimal_if = match sigversion {
                        SigVersion::WitnessV0 => self.flags.bits() & VERIFY_MINIMALIF != 0,
                        SigVersion::Taproot => true,
                        SigVersion::Base => false,
                    };
                    if enforce_minimal_if {
                        let bytes = condition.to_bytes();
                        let minimal = bytes.is_empty() || (bytes.len() == 1 && bytes[0] == 1);
                        if !minimal {
                            return Err(ScriptError::MinimalIf);
                        }
                    }
                    value = condition.to_bool();
                    if opcode == all::OP_NOTIF {
                        value = !value;
                    }
                }
                self.branches.push(value);
            }
            all::OP_ELSE => {
                let top = self
                    .branches
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
            }
            all::OP_ENDIF => {
                if self.branches.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn execute(
        &mut self,
        stack: &mut Stack,
        altstack: &mut Stack,
        op: &Operation,
        script: &Script,
        code_separator: usize,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        use all::*;

        let opcode = op.opcode();
        let require_minimal = self.flags.bits() & VERIFY_MINIMALDATA != 0;

        if opcode::is_reserved(opcode) || opcode::is_invalid(opcode) {
            return Err(ScriptError::BadOpcode);
        }

        match opcode {
            OP_TOALTSTACK => {
                let value = stack.pop()?;
                altstack.push(value)?;
            }
            OP_FROMALTSTACK => {
                let value = altstack
                    .pop()
                    .map_err(|_| ScriptError::InvalidAltstackOperation)?;
                stack.push(value)?;
            }
            OP_IFDUP => {
                let value = stack.peek(0)?.clone();
                if value.to_bool() {
                    stack.push(value)?;
                }
            }
            OP_DEPTH => {
                stack.push(StackValue::Num(stack.len() as i64))?;
            }
            OP_NOP => {}
            OP_NOP1 | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8 | OP_NOP9 | OP_NOP10 => {
                if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_NOPS != 0 {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }
            OP_DUP => {
                let value = stack.peek(0)?.clone();
                stack.push(value)?;
            }
            OP_DROP => {
                stack.pop()?;
            }
            OP_NIP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = stack.len() - 2;
                stack.items.remove(idx);
            }
            OP_OVER => {
                let value = stack.peek(1)?.clone();
                stack.push(value)?;
            }
            OP_ROT => {
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                stack.items.swap(len - 3, len - 2);
                stack.items.swap(len - 2, len - 1);
            }
            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                stack.items.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let value = stack.items[len - 1].clone();
                stack.items.insert(len - 2, value);
            }
            OP_2DROP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.pop()?;
                stack.pop()?;
            }
            OP_2DUP => {
                let first = stack.peek(1)?.clone();
                let second = stack.peek(0)?.clone();
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_3DUP => {
                let first = stack.peek(2)?.clone();
                let second = stack.peek(1)?.clone();
                let third = stack.peek(0)?.clone();
                stack.push(first)?;
                stack.push(second)?;
                stack.push(third)?;
            }
            OP_2OVER => {
                let first = stack.peek(3)?.clone();
                let second = stack.peek(2)?.clone();
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_2ROT => {
                if stack.len() < 6 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let first = stack.items[len - 6].clone();
                let second = stack.items[len - 5].clone();
                stack.items.drain(len - 6..len - 4);
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_2SWAP => {
                if stack.len() < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                stack.items.swap(len - 4, len - 2);
                stack.items.swap(len - 3, len - 1);
            }
            OP_PICK | OP_ROLL => {
                let depth = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                if depth < 0 || depth as usize >= stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = stack.len() - 1 - depth as usize;
                let value = if opcode == OP_ROLL {
                    stack.items.remove(idx)
                } else {
                    stack.items[idx].clone()
                };
                stack.push(value)?;
            }
            OP_SIZE => {
                let size = stack.peek(0)?.byte_len();
                stack.push(StackValue::Num(size as i64))?;
            }
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let num = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let result = match opcode {
                    OP_1ADD => num + 1,
                    OP_1SUB => num - 1,
                    OP_NEGATE => -num,
                    OP_ABS => num.abs(),
                    OP_NOT => i64::from(num == 0),
                    _ => i64::from(num != 0),
                };
                stack.push(StackValue::Num(result))?;
            }
            OP_ADD
            | OP_SUB
            | OP_BOOLAND
            | OP_BOOLOR
            | OP_NUMEQUAL
            | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL
            | OP_LESSTHAN
            | OP_GREATERTHAN
            | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL
            | OP_MIN
            | OP_MAX => {
                let b = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let a = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let result = match opcode {
                    OP_ADD => a.checked_add(b).ok_or(ScriptError::NumberOverflow)?,
                    OP_SUB => a.checked_sub(b).ok_or(ScriptError::NumberOverflow)?,
                    OP_BOOLAND => i64::from(a != 0 && b != 0),
                    OP_BOOLOR => i64::from(a != 0 || b != 0),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                    OP_NUMNOTEQUAL => i64::from(a != b),
                    OP_LESSTHAN => i64::from(a < b),
                    OP_GREATERTHAN => i64::from(a > b),
                    OP_LESSTHANOREQUAL => i64::from(a <= b),
                    OP_GREATERTHANOREQUAL => i64::from(a >= b),
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                stack.push(StackValue::Num(result))?;
                if opcode == OP_NUMEQUALVERIFY {
                    self.verify_top(stack, ScriptError::NumEqualVerify)?;
                }
            }
            OP_WITHIN => {
                let max = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let min = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let value = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                stack.push(StackValue::Bool(value >= min && value < max))?;
            }
            OP_CLTV => {
                if self.flags.bits() & VERIFY_CHECKLOCKTIMEVERIFY != 0 {
                    let locktime =
                        self.peek_num(stack, require_minimal, SCRIPTNUM_MAX_LEN_EXTENDED)?;
                    if locktime < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    self.check_lock_time(locktime as u64)?;
                } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_NOPS != 0 {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }
            OP_CSV => {
                if self.flags.bits() & VERIFY_CHECKSEQUENCEVERIFY != 0 {
                    let sequence =
                        self.peek_num(stack, require_minimal, SCRIPTNUM_MAX_LEN_EXTENDED)?;
                    if sequence < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    self.check_sequence(sequence as u64)?;
                } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_NOPS != 0 {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }
            OP_RIPEMD160 => {
                let data = stack.pop()?.into_bytes();
                let hash = ripemd160::Hash::hash(&data);
                stack.push(StackValue::Bytes(hash.to_byte_array().to_vec()))?;
            }
            OP_SHA1 => {
                let data = stack.pop()?.into_bytes();
                let hash = sha1::Hash::hash(&data);
                stack.push(StackValue::Bytes(hash.to_byte_array().to_vec()))?;
            }
            OP_SHA256 => {
                let data = stack.pop()?.into_bytes();
                let hash = sha256::Hash::hash(&data);
                stack.push(StackValue::Bytes(hash.to_byte_array().to_vec()))?;
            }
            OP_HASH160 => {
                let data = stack.pop()?.into_bytes();
                let hash = hash160::Hash::hash(&data);
                stack.push(StackValue::Bytes(hash.to_byte_array().to_vec()))?;
            }
            OP_HASH256 => {
                let data = stack.pop()?.into_bytes();
                let hash = sha256d::Hash::hash(&data);
                stack.push(StackValue::Bytes(hash.to_byte_array().to_vec()))?;
            }
            OP_EQUAL => {
                self.op_equal(stack)?;
            }
            OP_EQUALVERIFY => {
                self.op_equal(stack)?;
                self.verify_top(stack, ScriptError::EqualVerify)?;
            }
            OP_VERIFY => {
                self.verify_top(stack, ScriptError::Verify)?;
            }
            OP_RETURN => return Err(ScriptError::OpReturn),
            OP_CHECKSIG => {
                self.op_checksig(stack, script, code_separator, sigversion)?;
            }
            OP_CHECKSIGVERIFY => {
                self.op_checksig(stack, script, code_separator, sigversion)?;
                self.verify_top(stack, ScriptError::CheckSigVerify)?;
            }
            OP_CHECKSIGADD => {
                self.op_checksigadd(stack, sigversion)?;
            }
            OP_CHECKMULTISIG => {
                self.op_checkmultisig(stack, script, code_separator, sigversion)?;
            }
            OP_CHECKMULTISIGVERIFY => {
                self.op_checkmultisig(stack, script, code_separator, sigversion)?;
                self.verify_top(stack, ScriptError::CheckMultiSigVerify)?;
            }
            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn op_equal(&mut self, stack: &mut Stack) -> Result<(), ScriptError> {
        let a = stack.pop()?;
        let b = stack.pop()?;
        stack.push(StackValue::Bool(a.bytes_eq(&b)))
    }

    fn verify_top(&mut self, stack: &mut Stack, error: ScriptError) -> Result<(), ScriptError> {
        if stack.pop()?.to_bool() {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn pop_num(
        &mut self,
        stack: &mut Stack,
        minimal: bool,
        max_len: usize,
    ) -> Result<i64, ScriptError> {
        stack.pop()?.to_num(minimal, max_len)
    }

    fn peek_num(
        &mut self,
        stack: &Stack,
        minimal: bool,
        max_len: usize,
    ) -> Result<i64, ScriptError> {
        stack.peek(0)?.to_num(minimal, max_len)
    }

    fn check_lock_time(&self, locktime: u64) -> Result<(), ScriptError> {
        if locktime > u32::MAX as u64 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let tx = self.tx_ctx.tx();
        let tx_lock = tx.lock_time.to_consensus_u32();
        let locktime_u32 = locktime as u32;
        if tx_lock < locktime_u32 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        if (tx_lock < LOCK_TIME_THRESHOLD) != (locktime_u32 < LOCK_TIME_THRESHOLD) {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let sequence = tx.input[self.input_index].sequence.to_consensus_u32();
        if sequence == Sequence::MAX.0 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        Ok(())
    }

    fn check_sequence(&self, sequence: u64) -> Result<(), ScriptError> {
        if sequence > u32::MAX as u64 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        let sequence_u32 = sequence as u32;
        if sequence_u32 & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Ok(());
        }

        // Relative lock times only exist for version-2 transactions.
        if (self.tx_ctx.tx().version.0 as u32) < 2 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let tx_sequence = self.tx_ctx.tx().input[self.input_index]
            .sequence
            .to_consensus_u32();
        if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let tx_type = tx_sequence & SEQUENCE_LOCKTIME_TYPE_FLAG;
        let seq_type = sequence_u32 & SEQUENCE_LOCKTIME_TYPE_FLAG;
        if tx_type != seq_type {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let tx_value = if tx_type != 0 {
            (tx_sequence & SEQUENCE_LOCKTIME_MASK) << SEQUENCE_LOCKTIME_GRANULARITY
        } else {
            tx_sequence & SEQUENCE_LOCKTIME_MASK
        };
        let seq_value = if seq_type != 0 {
            (sequence_u32 & SEQUENCE_LOCKTIME_MASK) << SEQUENCE_LOCKTIME_GRANULARITY
        } else {
            sequence_u32 & SEQUENCE_LOCKTIME_MASK
        };

        if tx_value < seq_value {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        Ok(())
    }

    fn op_checksig(
        &mut self,
        stack: &mut Stack,
        script: &Script,
        code_separator: usize,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        let pubkey = stack.pop()?.into_bytes();
        let sig = stack.pop()?.into_bytes();
        let result = match sigversion {
            SigVersion::Taproot => self.verify_tapscript_signature(&sig, &pubkey)?,
            _ => {
                self.check_signature_encoding(&sig)?;
                self.check_pubkey_encoding(&pubkey, sigversion)?;
                self.verify_ecdsa_signature(&sig, &pubkey, script, code_separator, sigversion)?
            }
        };
        if sigversion != SigVersion::Taproot
            && !result
            && self.flags.bits() & VERIFY_NULLFAIL != 0
            && !sig.is_empty()
        {
            return Err(ScriptError::NullFail);
        }
        stack.push(StackValue::Bool(result))
    }

    fn op_checkmultisig(
        &mut self,
        stack: &mut Stack,
        script: &Script,
        code_separator: usize,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        if sigversion == SigVersion::Taproot {
            return Err(ScriptError::TapscriptCheckMultiSig);
        }
        let require_minimal = self.flags.bits() & VERIFY_MINIMALDATA != 0;
        let n_keys = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
        if n_keys < 0 || n_keys as usize > MAX_PUBKEYS_PER_MULTISIG {
            return Err(ScriptError::PubkeyCount);
        }
        let n_keys = n_keys as usize;
        self.add_ops(n_keys)?;

        let mut pubkeys = Vec::with_capacity(n_keys);
        for _ in 0..n_keys {
            pubkeys.push(stack.pop()?.into_bytes());
        }

        let n_sigs = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
        if n_sigs < 0 || n_sigs as usize > n_keys {
            return Err(ScriptError::SigCount);
        }
        let n_sigs = n_sigs as usize;

        let mut sigs = Vec::with_capacity(n_sigs);
        for _ in 0..n_sigs {
            sigs.push(stack.pop()?.into_bytes());
        }

        // The historical off-by-one: one extra element is consumed.
        let dummy = stack.pop()?.into_bytes();
        if self.flags.bits() & VERIFY_NULLDUMMY != 0 && !dummy.is_empty() {
            return Err(ScriptError::SigNullDummy);
        }

        let mut success = true;
        let mut sig_index = 0usize;
        let mut key_index = 0usize;
        let enforce_nullfail = self.flags.bits() & VERIFY_NULLFAIL != 0;

        while success && sig_index < sigs.len() {
            if pubkeys.len() - key_index < sigs.len() - sig_index {
                success = false;
                break;
            }

            self.check_signature_encoding(&sigs[sig_index])?;
            self.check_pubkey_encoding(&pubkeys[key_index], sigversion)?;
            let sig_valid = self.verify_ecdsa_signature(
                &sigs[sig_index],
                &pubkeys[key_index],
                script,
                code_separator,
                sigversion,
            )?;
            if !sig_valid && enforce_nullfail && !sigs[sig_index].is_empty() {
                return Err(ScriptError::NullFail);
            }
            if sig_valid {
                sig_index += 1;
            }
            key_index += 1;
        }

        if !success && enforce_nullfail {
            let has_non_empty = sigs[sig_index..].iter().any(|sig| !sig.is_empty());
            if has_non_empty {
                return Err(ScriptError::NullFail);
            }
        }

        let remaining_keys = pubkeys.len().saturating_sub(key_index);
        let remaining_sigs = sigs.len().saturating_sub(sig_index);
        if remaining_sigs > remaining_keys {
            success = false;
        }

        stack.push(StackValue::Bool(success))
    }

    fn op_checksigadd(
        &mut self,
        stack: &mut Stack,
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        if sigversion != SigVersion::Taproot {
            return Err(ScriptError::BadOpcode);
        }
        if stack.len() < 3 {
            return Err(ScriptError::InvalidStackOperation);
        }

        let pubkey = stack.pop()?.into_bytes();
        let require_minimal = self.flags.bits() & VERIFY_MINIMALDATA != 0;
        let value = self.pop_num(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
        let sig = stack.pop()?.into_bytes();
        let sig_valid = self.verify_tapscript_signature(&sig, &pubkey)?;
        stack.push(StackValue::Num(value + i64::from(sig_valid)))
    }

    /// Builds the legacy/v0 subscript: operations from the last executed
    /// code separator onward, with OP_CODESEPARATOR occurrences and the
    /// signature push removed for the pre-segwit dialect only. The second
    /// return reports whether a signature push was actually deleted, which
    /// makes the pre-image signature-dependent and uncacheable.
    fn subscript(
        &self,
        script: &Script,
        code_separator: usize,
        delete_sig: Option<&[u8]>,
        sigversion: SigVersion,
    ) -> (Vec<u8>, bool) {
        let tail = &script.ops()[code_separator.min(script.ops().len())..];
        if sigversion != SigVersion::Base {
            let mut bytes = Vec::new();
            for op in tail {
                op.write(&mut bytes);
            }
            return (bytes, false);
        }

        let sig_push = delete_sig
            .filter(|sig| !sig.is_empty())
            .map(|sig| Operation::from_data(sig, true).to_bytes());
        let mut bytes = Vec::new();
        let mut deleted = false;
        for op in tail {
            if op.opcode() == all::OP_CODESEPARATOR {
                continue;
            }
            let encoded = op.to_bytes();
            if sig_push.as_deref() == Some(encoded.as_slice()) {
                deleted = true;
                continue;
            }
            bytes.extend_from_slice(&encoded);
        }
        (bytes, deleted)
    }

    fn verify_ecdsa_signature(
        &mut self,
        sig_with_hashtype: &[u8],
        pubkey_bytes: &[u8],
        script: &Script,
        code_separator: usize,
        sigversion: SigVersion,
    ) -> Result<bool, ScriptError> {
        if sig_with_hashtype.len() < 2 {
            return Ok(false);
        }

        let sighash_type = *sig_with_hashtype.last().expect("length checked") as u32;
        let sig_bytes = &sig_with_hashtype[..sig_with_hashtype.len() - 1];
        let strict_encoding =
            self.flags.bits() & (VERIFY_DERSIG | VERIFY_LOW_S | VERIFY_STRICTENC) != 0;
        let signature = if strict_encoding {
            EcdsaSignature::from_der(sig_bytes).map_err(|_| ScriptError::SigDer)?
        } else {
            match EcdsaSignature::from_der_lax(sig_bytes) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            }
        };

        let pubkey = match PublicKey::from_slice(pubkey_bytes) {
            Ok(pk) => pk,
            Err(_) => return Ok(false),
        };

        let (script_code, modified) =
            self.subscript(script, code_separator, Some(sig_with_hashtype), sigversion);

        let digest = match self
            .sighash_cache
            .lookup(sigversion, sighash_type, code_separator)
            .filter(|_| !modified)
        {
            Some(digest) => digest,
            None => {
                let tx = self.tx_ctx.tx();
                let digest = match sigversion {
                    SigVersion::Base => {
                        legacy_signature_hash(tx, self.input_index, &script_code, sighash_type)
                            .to_byte_array()
                    }
                    SigVersion::WitnessV0 => segwit_v0_signature_hash(
                        tx,
                        &self.precomputed,
                        self.input_index,
                        &script_code,
                        self.amount,
                        sighash_type,
                    )
                    .to_byte_array(),
                    SigVersion::Taproot => return Err(ScriptError::Unknown),
                };
                if !modified {
                    self.sighash_cache
                        .store(sigversion, sighash_type, code_separator, digest);
                }
                digest
            }
        };

        let mut normalized_sig = signature;
        normalized_sig.normalize_s();
        let message = Message::from_digest(digest);
        let is_valid = with_secp256k1_verification_ctx(|secp| {
            secp.verify_ecdsa(&message, &normalized_sig, &pubkey).is_ok()
        });
        Ok(is_valid)
    }

    fn consume_tapscript_sigop(&mut self) -> Result<(), ScriptError> {
        let remaining = self
            .exec_data
            .validation_weight_left
            .as_mut()
            .ok_or(ScriptError::Unknown)?;
        *remaining -= VALIDATION_WEIGHT_PER_SIGOP_PASSED;
        if *remaining < 0 {
            Err(ScriptError::TapscriptValidationWeight)
        } else {
            Ok(())
        }
    }

    fn check_signature_encoding(&mut self, sig_with_hashtype: &[u8]) -> Result<(), ScriptError> {
        if sig_with_hashtype.is_empty() {
            return Ok(());
        }
        let flags = self.flags.bits();
        let enforce_der = flags & (VERIFY_DERSIG | VERIFY_LOW_S | VERIFY_STRICTENC) != 0;
        if enforce_der && !is_valid_signature_encoding(sig_with_hashtype) {
            return Err(ScriptError::SigDer);
        }
        if flags & VERIFY_LOW_S != 0 && !is_low_der_signature(sig_with_hashtype) {
            return Err(ScriptError::SigHighS);
        }
        if flags & VERIFY_STRICTENC != 0 && !is_defined_hashtype_signature(sig_with_hashtype) {
            return Err(ScriptError::SigHashType);
        }
        Ok(())
    }

    fn check_pubkey_encoding(
        &mut self,
        pubkey: &[u8],
        sigversion: SigVersion,
    ) -> Result<(), ScriptError> {
        if self.flags.bits() & VERIFY_STRICTENC != 0 && !is_valid_pubkey_encoding(pubkey) {
            return Err(ScriptError::PubkeyType);
        }
        if sigversion == SigVersion::WitnessV0
            && self.flags.bits() & VERIFY_WITNESS_PUBKEYTYPE != 0
            && !is_compressed_pubkey(pubkey)
        {
            return Err(ScriptError::WitnessPubkeyType);
        }
        Ok(())
    }

    fn execute_witness_program(
        &mut self,
        version: u8,
        program: &[u8],
        witness: &Witness,
    ) -> Result<(), ScriptError> {
        match version {
            0 => match program.len() {
                20 => self.verify_p2wkh(program, witness),
                32 => self.verify_p2wsh(program, witness),
                _ => Err(ScriptError::WitnessProgramWrongLength),
            },
            1 => {
                if program.len() == 32 {
                    self.execute_taproot_program(program, witness)
                } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM != 0 {
                    Err(ScriptError::DiscourageUpgradableWitnessProgram)
                } else {
                    Ok(())
                }
            }
            _ => {
                if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM != 0 {
                    Err(ScriptError::DiscourageUpgradableWitnessProgram)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn verify_p2wkh(&mut self, program: &[u8], witness: &Witness) -> Result<(), ScriptError> {
        if witness.len() != 2 {
            return Err(ScriptError::WitnessProgramMismatch);
        }

        self.add_sigops(1)?;
        let mut stack = witness_stack(witness, witness.len())?;
        // Synthetic locking script: the key-hash template around the program.
        let script = Script::from_operations(vec![
            Operation::from_opcode(all::OP_DUP),
            Operation::from_opcode(all::OP_HASH160),
            Operation::from_data(program, true),
            Operation::from_opcode(all::OP_EQUALVERIFY),
            Operation::from_opcode(all::OP_CHECKSIG),
        ]);

        self.run_script(&mut stack, &script, SigVersion::WitnessV0)?;
        self.ensure_witness_success(&stack)
    }

    fn verify_p2wsh(&mut self, program: &[u8], witness: &Witness) -> Result<(), ScriptError> {
        if witness.is_empty() {
            return Err(ScriptError::WitnessProgramWitnessEmpty);
        }

        let witness_script_bytes = witness[witness.len() - 1].to_vec();
        let script_hash = sha256::Hash::hash(&witness_script_bytes);
        if script_hash.as_byte_array() != program {
            return Err(ScriptError::WitnessProgramMismatch);
        }

        self.add_sigops_from_bytes(&witness_script_bytes)?;
        let witness_script = Script::from_data(&witness_script_bytes, false);
        let mut stack = witness_stack(witness, witness.len() - 1)?;

        self.run_script(&mut stack, &witness_script, SigVersion::WitnessV0)?;
        self.ensure_witness_success(&stack)
    }

    fn add_sigops_from_bytes(&mut self, script_bytes: &[u8]) -> Result<(), ScriptError> {
        let script = Script::from_data(script_bytes, false);
        self.add_sigops(script.sigops(true))
    }

    fn execute_taproot_program(
        &mut self,
        program: &[u8],
        witness: &Witness,
    ) -> Result<(), ScriptError> {
        if self.flags.bits() & VERIFY_TAPROOT == 0 {
            return Ok(());
        }

        if witness.is_empty() {
            return Err(ScriptError::WitnessProgramWitnessEmpty);
        }

        self.exec_data = ExecutionData::default();

        let mut stack_len = witness.len();
        if stack_len >= 2 {
            let last = &witness[stack_len - 1];
            if !last.is_empty() && last[0] == TAPROOT_ANNEX_PREFIX {
                self.exec_data.annex = Some(last.to_vec());
                stack_len -= 1;
            }
        }

        if stack_len == 0 {
            return Err(ScriptError::WitnessProgramWitnessEmpty);
        }

        if stack_len == 1 {
            let signature = witness[0].to_vec();
            return self.verify_taproot_key_path(program, &signature);
        }

        let control = ControlBlock::parse(&witness[stack_len - 1])?;
        let script_bytes = &witness[stack_len - 2];
        stack_len -= 2;
        let leaf_version = control.leaf_version();
        let tapleaf_hash = compute_tapleaf_hash(script_bytes, leaf_version);
        let merkle_root = compute_taproot_merkle_root(control.bytes(), tapleaf_hash)?;
        self.verify_taproot_commitment(program, control.bytes(), merkle_root)?;
        self.exec_data.tapleaf_hash = Some(tapleaf_hash);

        if leaf_version == TAPROOT_LEAF_TAPSCRIPT {
            let tapscript = Script::from_data(script_bytes, false);
            if contains_op_success(&tapscript)? {
                if self.flags.bits() & VERIFY_DISCOURAGE_OP_SUCCESS != 0 {
                    return Err(ScriptError::DiscourageOpSuccess);
                }
                return Ok(());
            }
            let witness_weight =
                serialized_witness_size(witness).ok_or(ScriptError::Unknown)?;
            self.exec_data.validation_weight_left = Some(witness_weight + VALIDATION_WEIGHT_OFFSET);
            let mut stack = witness_stack(witness, stack_len)?;
            self.run_script(&mut stack, &tapscript, SigVersion::Taproot)?;
            self.ensure_witness_success(&stack)
        } else if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION != 0 {
            Err(ScriptError::DiscourageUpgradableTaprootVersion)
        } else {
            Ok(())
        }
    }

    fn verify_taproot_commitment(
        &mut self,
        program: &[u8],
        control: &[u8],
        merkle_root: TapNodeHash,
    ) -> Result<(), ScriptError> {
        let internal_key = UntweakedPublicKey::from_slice(&control[1..TAPROOT_CONTROL_BASE_SIZE])
            .map_err(|_| ScriptError::WitnessProgramMismatch)?;
        let output_key = XOnlyPublicKey::from_slice(program)
            .map_err(|_| ScriptError::WitnessProgramMismatch)?;
        let parity_bit = control[0] & 1;
        with_secp256k1_verification_ctx(|secp| {
            let (expected_key, expected_parity) = internal_key.tap_tweak(secp, Some(merkle_root));
            let expected_parity_bit = match expected_parity {
                Parity::Even => 0u8,
                Parity::Odd => 1u8,
            };
            if parity_bit != expected_parity_bit {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            if expected_key.to_x_only_public_key() != output_key {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            Ok(())
        })
    }

    fn verify_taproot_key_path(
        &mut self,
        program: &[u8],
        signature: &[u8],
    ) -> Result<(), ScriptError> {
        if program.len() != 32 {
            return Err(ScriptError::WitnessProgramMismatch);
        }
        if signature.is_empty() {
            return Err(ScriptError::SchnorrSigSize);
        }

        let pubkey = XOnlyPublicKey::from_slice(program)
            .map_err(|_| ScriptError::WitnessProgramMismatch)?;
        let (schnorr_sig, sighash_byte) = parse_schnorr_signature(signature)?;
        if self.verify_schnorr_signature(&schnorr_sig, sighash_byte, &pubkey, None)? {
            Ok(())
        } else {
            Err(ScriptError::SchnorrSig)
        }
    }

    fn verify_tapscript_signature(
        &mut self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
    ) -> Result<bool, ScriptError> {
        // Weight is consumed for every non-empty signature, whatever the
        // pubkey turns out to be.
        if !sig_bytes.is_empty() {
            self.consume_tapscript_sigop()?;
        }

        if pubkey_bytes.is_empty() {
            return Err(ScriptError::PubkeyType);
        }

        if pubkey_bytes.len() != 32 {
            // Unknown pubkey types succeed for upgradability.
            if self.flags.bits() & VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE != 0 {
                return Err(ScriptError::DiscourageUpgradablePubkeyType);
            }
            return Ok(!sig_bytes.is_empty());
        }

        if sig_bytes.is_empty() {
            return Ok(false);
        }

        let (schnorr_sig, sighash_byte) = parse_schnorr_signature(sig_bytes)?;
        let pubkey = XOnlyPublicKey::from_slice(pubkey_bytes)
            .map_err(|_| ScriptError::PubkeyType)?;
        let tapleaf_hash = self
            .exec_data
            .tapleaf_hash
            .ok_or(ScriptError::WitnessProgramMismatch)?;
        let code_separator = self.exec_data.code_separator_pos.unwrap_or(u32::MAX);
        let is_valid = self.verify_schnorr_signature(
            &schnorr_sig,
            sighash_byte,
            &pubkey,
            Some((tapleaf_hash, code_separator)),
        )?;
        // A non-empty invalid signature fails the script outright.
        if !is_valid {
            return Err(ScriptError::SchnorrSig);
        }
        Ok(true)
    }

    fn verify_schnorr_signature(
        &mut self,
        signature: &SchnorrSignature,
        sighash_byte: u8,
        pubkey: &XOnlyPublicKey,
        leaf_hash: Option<(TapLeafHash, u32)>,
    ) -> Result<bool, ScriptError> {
        let spent_outputs = self
            .spent_outputs
            .as_ref()
            .ok_or(ScriptError::Unknown)?;
        let sighash = taproot_signature_hash(
            self.tx_ctx.tx(),
            &self.precomputed,
            spent_outputs,
            self.input_index,
            sighash_byte,
            self.exec_data.annex.as_deref(),
            leaf_hash,
        )?;
        let message = <Message as From<_>>::from(sighash);
        let is_valid = with_secp256k1_verification_ctx(|secp| {
            secp.verify_schnorr(signature, &message, pubkey).is_ok()
        });
        Ok(is_valid)
    }

    fn require_clean_stack(&self) -> Result<(), ScriptError> {
        if self.stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
        if !self.stack.last().expect("length checked").to_bool() {
            return Err(ScriptError::CleanStack);
        }
        Ok(())
    }

    fn ensure_witness_success(&mut self, stack: &Stack) -> Result<(), ScriptError> {
        if stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
        if !stack.last().expect("length checked").to_bool() {
            return Err(ScriptError::EvalFalse);
        }
        Ok(())
    }
}

/// The value a push operation leaves on the stack.
fn push_value(op: &Operation) -> StackValue {
    if let Some(positive) = opcode::opcode_to_positive(op.opcode()) {
        return StackValue::Num(i64::from(positive));
    }
    if op.opcode() == all::OP_PUSHNUM_NEG1 {
        return StackValue::Num(-1);
    }
    StackValue::Bytes(op.data().to_vec())
}

fn parse_schnorr_signature(
    sig_with_hashtype: &[u8],
) -> Result<(SchnorrSignature, u8), ScriptError> {
    if sig_with_hashtype.len() != 64 && sig_with_hashtype.len() != 65 {
        return Err(ScriptError::SchnorrSigSize);
    }

    let sighash_byte = if sig_with_hashtype.len() == 65 {
        let byte = sig_with_hashtype[64];
        // The default type must use the 64-byte form.
        if byte == 0 {
            return Err(ScriptError::SchnorrSigHashType);
        }
        byte
    } else {
        0
    };

    let signature = SchnorrSignature::from_slice(&sig_with_hashtype[..64])
        .map_err(|_| ScriptError::SchnorrSig)?;
    Ok((signature, sighash_byte))
}

fn compute_tapleaf_hash(script_bytes: &[u8], leaf_version: u8) -> TapLeafHash {
    let mut engine = TapLeafHash::engine();
    engine.input(&[leaf_version]);
    bitcoin::ScriptBuf::from_bytes(script_bytes.to_vec())
        .consensus_encode(&mut engine)
        .expect("engines never fail");
    TapLeafHash::from_engine(engine)
}

fn compute_taproot_merkle_root(
    control: &[u8],
    tapleaf_hash: TapLeafHash,
) -> Result<TapNodeHash, ScriptError> {
    let mut current = TapNodeHash::from(tapleaf_hash);
    let mut index = TAPROOT_CONTROL_BASE_SIZE;
    while index < control.len() {
        let end = index + TAPROOT_CONTROL_NODE_SIZE;
        if end > control.len() {
            return Err(ScriptError::TaprootWrongControlSize);
        }
        let mut node_bytes = [0u8; TAPROOT_CONTROL_NODE_SIZE];
        node_bytes.copy_from_slice(&control[index..end]);
        let node = TapNodeHash::from_byte_array(node_bytes);
        current = TapNodeHash::from_node_hashes(current, node);
        index = end;
    }
    Ok(current)
}

fn contains_op_success(script: &Script) -> Result<bool, ScriptError> {
    for op in script.ops() {
        if op.is_underflow() {
            return Err(ScriptError::BadOpcode);
        }
        if opcode::is_success(op.opcode()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn witness_stack(witness: &Witness, end: usize) -> Result<Stack, ScriptError> {
    if end > witness.len() {
        return Err(ScriptError::StackSize);
    }
    let chunks = witness.iter().take(end).map(<[u8]>::to_vec).collect();
    Stack::from_chunks(chunks)
}

fn serialized_witness_size(witness: &Witness) -> Option<i64> {
    let mut total = crate::script::compact_size_len(witness.len() as u64) as u64;
    for element in witness.iter() {
        let len = element.len() as u64;
        total = total.checked_add(crate::script::compact_size_len(len) as u64)?;
        total = total.checked_add(len)?;
    }
    i64::try_from(total).ok()
}

fn is_canonical_single_push(script: &Script) -> bool {
    match script.ops() {
        [op] => op.is_valid() && (op.opcode() == all::OP_PUSHBYTES_0 || is_payload(op.opcode())),
        _ => false,
    }
}

fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 {
        return false;
    }
    if sig[1] as usize != sig.len() - 3 {
        return false;
    }

    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;

    if sig[2] != 0x02 {
        return false;
    }
    if len_r == 0 {
        return false;
    }
    if sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && (sig[5] & 0x80) == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 {
        return false;
    }
    if len_s == 0 {
        return false;
    }
    if len_r + len_s + 7 != sig.len() {
        return false;
    }
    if sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && (sig[len_r + 7] & 0x80) == 0 {
        return false;
    }
    true
}

fn is_defined_hashtype_signature(sig: &[u8]) -> bool {
    if sig.is_empty() {
        return false;
    }
    let base = sig[sig.len() - 1] & 0x1f;
    matches!(base, 0x01..=0x03)
}

fn is_low_der_signature(sig: &[u8]) -> bool {
    if !is_valid_signature_encoding(sig) || sig.len() < 2 {
        return false;
    }

    let sig_bytes = &sig[..sig.len() - 1];
    let Ok(signature) = EcdsaSignature::from_der(sig_bytes) else {
        return false;
    };
    let mut normalized = signature;
    normalized.normalize_s();
    normalized == signature
}

fn is_valid_pubkey_encoding(pubkey: &[u8]) -> bool {
    if pubkey.len() == 33 {
        matches!(pubkey[0], 0x02 | 0x03)
    } else if pubkey.len() == 65 {
        pubkey[0] == 0x04
    } else {
        false
    }
}

fn is_compressed_pubkey(pubkey: &[u8]) -> bool {
    pubkey.len() == 33 && matches!(pubkey[0], 0x02 | 0x03)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_values_take_the_cheap_variants() {
        assert_eq!(
            push_value(&Operation::from_opcode(all::OP_PUSHNUM_16)),
            StackValue::Num(16)
        );
        assert_eq!(
            push_value(&Operation::from_opcode(all::OP_PUSHNUM_NEG1)),
            StackValue::Num(-1)
        );
        assert_eq!(
            push_value(&Operation::from_data(&[0xaa, 0xbb], true)),
            StackValue::Bytes(vec![0xaa, 0xbb])
        );
        assert_eq!(
            push_value(&Operation::from_opcode(all::OP_PUSHBYTES_0)),
            StackValue::Bytes(Vec::new())
        );
    }

    #[test]
    fn schnorr_signature_forms() {
        assert_eq!(
            parse_schnorr_signature(&[0u8; 63]).unwrap_err(),
            ScriptError::SchnorrSigSize
        );
        // 65-byte form with explicit default type is malformed.
        let mut sig = [1u8; 65];
        sig[64] = 0x00;
        assert_eq!(
            parse_schnorr_signature(&sig).unwrap_err(),
            ScriptError::SchnorrSigHashType
        );
        let (_, byte) = parse_schnorr_signature(&[1u8; 64]).expect("64-byte form");
        assert_eq!(byte, 0);
        sig[64] = 0x81;
        let (_, byte) = parse_schnorr_signature(&sig).expect("65-byte form");
        assert_eq!(byte, 0x81);
    }

    #[test]
    fn canonical_single_push_detection() {
        assert!(is_canonical_single_push(&Script::from_data(
            &[0x02, 0xaa, 0xbb],
            false
        )));
        assert!(is_canonical_single_push(&Script::from_data(&[0x00], false)));
        // OP_16 is a push but not a canonical data push.
        assert!(!is_canonical_single_push(&Script::from_data(&[0x60], false)));
        assert!(!is_canonical_single_push(&Script::from_data(
            &[0x01, 0xaa, 0x51],
            false
        )));
    }

    #[test]
    fn der_encoding_checks() {
        // R=1, S=1, minimal DER, plus a SIGHASH_ALL byte.
        let sig = [
            0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01, 0x01,
        ];
        assert!(is_valid_signature_encoding(&sig));
        assert!(is_defined_hashtype_signature(&sig));

        let mut bad = sig;
        bad[0] = 0x31;
        assert!(!is_valid_signature_encoding(&bad));

        let mut undefined_type = sig;
        undefined_type[8] = 0x04;
        assert!(!is_defined_hashtype_signature(&undefined_type));
        undefined_type[8] = 0x81;
        assert!(is_defined_hashtype_signature(&undefined_type));
    }

    #[test]
    fn pubkey_encoding_checks() {
        let mut compressed = vec![0x02];
        compressed.extend_from_slice(&[0u8; 32]);
        assert!(is_valid_pubkey_encoding(&compressed));
        assert!(is_compressed_pubkey(&compressed));

        let mut uncompressed = vec![0x04];
        uncompressed.extend_from_slice(&[0u8; 64]);
        assert!(is_valid_pubkey_encoding(&uncompressed));
        assert!(!is_compressed_pubkey(&uncompressed));

        assert!(!is_valid_pubkey_encoding(&[0x02; 20]));
    }

    #[test]
    fn merkle_root_of_leaf_alone_is_the_leaf() {
        let leaf = TapLeafHash::from_byte_array([9u8; 32]);
        let control = [0u8; TAPROOT_CONTROL_BASE_SIZE];
        let root = compute_taproot_merkle_root(&control, leaf).expect("no path");
        assert_eq!(root, TapNodeHash::from(leaf));
    }
}
