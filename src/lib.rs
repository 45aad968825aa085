#![cfg_attr(not(feature = "std"), no_std)]
//! Bitcoin Script interpreter and transaction signature-verification engine.
//!
//! The crate decides whether a spending input satisfies the locking condition
//! on the coin it consumes, byte-for-byte compatible with the network's
//! consensus rules: opcode classification, operation and script parsing,
//! the stack machine, and the legacy/BIP143/BIP341 signature pre-images.
//! Everything on the validation path is a total function into
//! `Result<(), ScriptError>` — no panics, no unbounded allocation.
//!
//! Rule activation is an input: callers pass the `VERIFY_*` bitmask that
//! chain state says is in force, and the engine never decides activation
//! itself.

#[cfg(not(feature = "std"))]
extern crate alloc;

mod error;
pub mod opcode;
mod operation;
mod program;
mod script;
mod sighash;
mod stack;
mod tx;

pub use error::ScriptError;
pub use operation::Operation;
pub use program::{Program, SpendContext};
pub use script::{Script, ScriptPattern};
pub use sighash::{
    legacy_signature_hash, segwit_v0_signature_hash, taproot_signature_hash, SigVersion,
    SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE,
};
pub use stack::{Stack, StackValue};
pub use tx::{PrecomputedTransactionData, SpentOutputs, TransactionContext};

use core::fmt;

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Evaluate P2SH (BIP16) subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Enforce strict ECDSA encoding (BIP62).
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Enforce strict DER (BIP66) compliance.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Require signatures to use low-S form (BIP62).
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Enforce NULLDUMMY (BIP147).
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Require scriptSig to be push only.
pub const VERIFY_SIGPUSHONLY: u32 = 1 << 5;
/// Require minimal data encodings (BIP62).
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Discourage use of upgradable NOP opcodes.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
/// Require a clean stack after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;
/// Enable CHECKLOCKTIMEVERIFY (BIP65).
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Enable CHECKSEQUENCEVERIFY (BIP112).
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
/// Enable WITNESS (BIP141).
pub const VERIFY_WITNESS: u32 = 1 << 11;
/// Discourage unknown witness program versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: u32 = 1 << 12;
/// Require minimal encodings for IF/NOTIF.
pub const VERIFY_MINIMALIF: u32 = 1 << 13;
/// Enforce NULLFAIL behaviour (BIP147).
pub const VERIFY_NULLFAIL: u32 = 1 << 14;
/// Require compressed pubkeys in segwit v0 contexts.
pub const VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;
/// Disabled opcodes fail even inside a branch that never executes.
///
/// The rule changed historically, so it is a flag rather than a constant;
/// with the bit clear a disabled opcode only fails when executed.
pub const VERIFY_DISABLED_UNEXECUTED: u32 = 1 << 16;
/// Enable TAPROOT (BIPs 341 & 342).
pub const VERIFY_TAPROOT: u32 = 1 << 17;
/// Discourage unknown Taproot leaf versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION: u32 = 1 << 18;
/// Discourage unknown OP_SUCCESS opcodes inside tapscript.
pub const VERIFY_DISCOURAGE_OP_SUCCESS: u32 = 1 << 19;
/// Discourage unknown Taproot public key versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE: u32 = 1 << 20;

/// Aggregate of all soft-fork flags prior to Taproot activation.
pub const VERIFY_ALL_PRE_TAPROOT: u32 = VERIFY_P2SH
    | VERIFY_DERSIG
    | VERIFY_NULLDUMMY
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS
    | VERIFY_DISABLED_UNEXECUTED;

const SUPPORTED_FLAGS: u32 = VERIFY_P2SH
    | VERIFY_STRICTENC
    | VERIFY_DERSIG
    | VERIFY_LOW_S
    | VERIFY_NULLDUMMY
    | VERIFY_SIGPUSHONLY
    | VERIFY_MINIMALDATA
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CLEANSTACK
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS
    | VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
    | VERIFY_MINIMALIF
    | VERIFY_NULLFAIL
    | VERIFY_WITNESS_PUBKEYTYPE
    | VERIFY_DISABLED_UNEXECUTED
    | VERIFY_TAPROOT
    | VERIFY_DISCOURAGE_UPGRADABLE_TAPROOT_VERSION
    | VERIFY_DISCOURAGE_OP_SUCCESS
    | VERIFY_DISCOURAGE_UPGRADABLE_PUBKEYTYPE;

/// Wrapper for script verification flags.
#[derive(Debug, Clone, Copy)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::ERR_INVALID_FLAGS);
        }
        Ok(Self(Self::apply_implied_bits(bits)))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn requires_spent_outputs(self) -> bool {
        self.0 & VERIFY_TAPROOT != 0
    }

    fn apply_implied_bits(mut bits: u32) -> u32 {
        if bits & VERIFY_TAPROOT != 0 {
            bits |= VERIFY_WITNESS;
        }
        if bits & VERIFY_WITNESS != 0 {
            bits |= VERIFY_P2SH;
        }
        bits
    }
}

/// A previous output referenced by the transaction under validation.
#[derive(Debug, Copy, Clone)]
pub struct Utxo<'a> {
    /// The locking script of the spent output.
    pub script_pubkey: &'a [u8],
    /// The value in sats.
    pub value: u64,
}

/// Detailed failure information returned by the diagnostic verification APIs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// High-level error code.
    pub error: Error,
    /// Detailed interpreter error.
    pub script_error: ScriptError,
}

/// Verifies a single spend (input) of a Bitcoin transaction under the
/// default rule set (everything pre-taproot, plus taproot when the spent
/// outputs are supplied).
pub fn verify(
    spent_output: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo<'_>]>,
    input_index: usize,
) -> Result<(), Error> {
    let flags = match spent_outputs {
        Some(_) => VERIFY_ALL_PRE_TAPROOT | VERIFY_TAPROOT,
        None => VERIFY_ALL_PRE_TAPROOT,
    };

    verify_with_flags(
        spent_output,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
}

/// Same as [`verify`] but also reports the interpreter's [`ScriptError`].
pub fn verify_with_details(
    spent_output: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo<'_>]>,
    input_index: usize,
) -> Result<(), ScriptFailure> {
    let flags = match spent_outputs {
        Some(_) => VERIFY_ALL_PRE_TAPROOT | VERIFY_TAPROOT,
        None => VERIFY_ALL_PRE_TAPROOT,
    };

    perform_verification(
        spent_output,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
}

/// Same as [`verify`] but with explicit script verification flags.
pub fn verify_with_flags(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo<'_>]>,
    input_index: usize,
    flags: u32,
) -> Result<(), Error> {
    perform_verification(
        spent_output_script,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
    .map_err(|failure| failure.error)
}

/// Same as [`verify_with_flags`] but also reports the interpreter's [`ScriptError`].
pub fn verify_with_flags_detailed(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo<'_>]>,
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    perform_verification(
        spent_output_script,
        amount,
        spending_transaction,
        spent_outputs,
        input_index,
        flags,
    )
}

fn outer_failure(error: Error) -> ScriptFailure {
    ScriptFailure {
        error,
        script_error: ScriptError::Ok,
    }
}

fn perform_verification(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    spent_outputs: Option<&[Utxo<'_>]>,
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    let tx_ctx = TransactionContext::parse(spending_transaction).map_err(outer_failure)?;
    tx_ctx
        .ensure_input_index(input_index)
        .map_err(outer_failure)?;

    let flags = ScriptFlags::from_bits(flags).map_err(outer_failure)?;
    let spent_outputs = spent_outputs
        .map(|raw| SpentOutputs::new(tx_ctx.tx().input.len(), raw))
        .transpose()
        .map_err(outer_failure)?;

    let mut derived_amount: Option<u64> = None;
    if let Some(set) = spent_outputs.as_ref() {
        let prevout = &set.txouts()[input_index];
        if prevout.script_pubkey.as_bytes() != spent_output_script {
            return Err(outer_failure(Error::ERR_SPENT_OUTPUTS_MISMATCH));
        }
        derived_amount = Some(prevout.value.to_sat());
    }
    let amount = derived_amount.unwrap_or(amount);

    let precomputed = tx_ctx.build_precomputed(spent_outputs.as_ref(), false);
    let spend_context = SpendContext::new(spent_output_script, spent_outputs, amount, true);
    let mut program = Program::new(&tx_ctx, precomputed, input_index, spend_context, flags)
        .map_err(outer_failure)?;

    program.verify().map_err(|script_error| ScriptFailure {
        error: Error::ERR_SCRIPT,
        script_error,
    })
}

/// Errors returned by the consensus verifier outside the interpreter itself.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The script failed evaluation; see the accompanying [`ScriptError`].
    ERR_SCRIPT,
    /// An invalid input index for the spending transaction.
    ERR_TX_INDEX,
    /// The spending transaction length did not match its serialization.
    ERR_TX_SIZE_MISMATCH,
    /// An error deserializing the spending transaction.
    ERR_TX_DESERIALIZE,
    /// Input amount is required if WITNESS is used.
    ERR_AMOUNT_REQUIRED,
    /// Script verification flags are invalid.
    ERR_INVALID_FLAGS,
    /// Verifying a Taproot input requires the previous outputs.
    ERR_SPENT_OUTPUTS_REQUIRED,
    /// The supplied spent outputs don't match the transaction.
    ERR_SPENT_OUTPUTS_MISMATCH,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        let description = match *self {
            ERR_SCRIPT => "script verification failed",
            ERR_TX_INDEX => "an invalid index for the spending transaction",
            ERR_TX_SIZE_MISMATCH => "length did not match the serialized transaction",
            ERR_TX_DESERIALIZE => "an error deserializing the spending transaction",
            ERR_AMOUNT_REQUIRED => "input amount is required if WITNESS is used",
            ERR_INVALID_FLAGS => "script verification flags are invalid",
            ERR_SPENT_OUTPUTS_REQUIRED => "verifying taproot input requires previous outputs",
            ERR_SPENT_OUTPUTS_MISMATCH => "spent outputs don't match",
        };

        f.write_str(description)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{
        absolute::LockTime,
        blockdata::script::{Builder, PushBytesBuf, ScriptBuf},
        consensus,
        hashes::{sha256, Hash},
        hex::FromHex,
        opcodes::all,
        transaction::Version,
        Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness,
    };

    fn spending_tx(script_sig: ScriptBuf, lock_time: LockTime, sequence: Sequence) -> Transaction {
        Transaction {
            version: Version(2),
            lock_time,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig,
                sequence,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(0),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn run_script_with_ctx_flags(
        script_sig: ScriptBuf,
        spent_script: ScriptBuf,
        lock_time: LockTime,
        sequence: Sequence,
        flags: u32,
    ) -> Result<(), Error> {
        let tx = spending_tx(script_sig, lock_time, sequence);
        let tx_bytes = consensus::serialize(&tx);
        verify_with_flags(spent_script.as_bytes(), 0, &tx_bytes, None, 0, flags)
    }

    fn run_script_with_ctx_flags_detailed(
        script_sig: ScriptBuf,
        spent_script: ScriptBuf,
        lock_time: LockTime,
        sequence: Sequence,
        flags: u32,
    ) -> Result<(), ScriptFailure> {
        let tx = spending_tx(script_sig, lock_time, sequence);
        let tx_bytes = consensus::serialize(&tx);
        verify_with_flags_detailed(spent_script.as_bytes(), 0, &tx_bytes, None, 0, flags)
    }

    fn run_simple_script(script_sig: ScriptBuf, spent_script: ScriptBuf) -> Result<(), Error> {
        run_script_with_ctx_flags(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
    }

    fn run_witness_script_with_ctx(
        script_sig: ScriptBuf,
        spent_script: ScriptBuf,
        witness: Witness,
        amount: Amount,
        flags: u32,
    ) -> Result<(), ScriptFailure> {
        let mut tx = spending_tx(script_sig, LockTime::ZERO, Sequence::MAX);
        tx.input[0].witness = witness;
        let tx_bytes = consensus::serialize(&tx);
        verify_with_flags_detailed(
            spent_script.as_bytes(),
            amount.to_sat(),
            &tx_bytes,
            None,
            0,
            flags,
        )
    }

    fn push_data_script(data: &[u8]) -> ScriptBuf {
        Builder::new()
            .push_slice(PushBytesBuf::try_from(data.to_vec()).unwrap())
            .into_script()
    }

    #[test]
    fn rejects_unknown_flags() {
        let invalid_bit = 1 << 31;
        ScriptFlags::from_bits(invalid_bit).expect_err("invalid flag");
    }

    #[test]
    fn taproot_flag_implies_witness_and_p2sh() {
        let flags = ScriptFlags::from_bits(VERIFY_TAPROOT).unwrap();
        assert!(flags.requires_spent_outputs());
        assert!(flags.bits() & VERIFY_WITNESS != 0);
        assert!(flags.bits() & VERIFY_P2SH != 0);
    }

    #[test]
    fn verify_legacy_p2pkh() {
        let spent = Vec::from_hex("76a9144bfbaf6afb76cc5771bc6404810d1cc041a6933988ac").unwrap();
        let spending = Vec::from_hex("02000000013f7cebd65c27431a90bba7f796914fe8cc2ddfc3f2cbd6f7e5f2fc854534da95000000006b483045022100de1ac3bcdfb0332207c4a91f3832bd2c2915840165f876ab47c5f8996b971c3602201c6c053d750fadde599e6f5c4e1963df0f01fc0d97815e8157e3d59fe09ca30d012103699b464d1d8bc9e47d4fb1cdaa89a1c5783d68363c4dbc4b524ed3d857148617feffffff02836d3c01000000001976a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac7ada8202000000001976a914fbed3d9b11183209a57999d54d59f67c019e756c88ac6acb0700").unwrap();

        verify(&spent, 0, &spending, None, 0).expect("valid spend");
    }

    #[test]
    fn verify_simple_p2sh_redeem_script() {
        let redeem_script = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let script_sig = push_data_script(redeem_script.as_bytes());
        let spent_script = ScriptBuf::new_p2sh(&redeem_script.script_hash());

        let tx = spending_tx(script_sig, LockTime::ZERO, Sequence::MAX);
        let tx_bytes = consensus::serialize(&tx);
        verify_with_flags(spent_script.as_bytes(), 0, &tx_bytes, None, 0, VERIFY_P2SH)
            .expect("p2sh redeem should validate");
    }

    #[test]
    fn verify_p2sh_p2wsh_trivial_witness() {
        let witness_script = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let witness_script_bytes = witness_script.as_bytes().to_vec();
        let redeem_hash = sha256::Hash::hash(&witness_script_bytes);
        let redeem_script = Builder::new()
            .push_opcode(all::OP_PUSHBYTES_0)
            .push_slice(PushBytesBuf::try_from(redeem_hash.to_byte_array().to_vec()).unwrap())
            .into_script();
        let script_sig = push_data_script(redeem_script.as_bytes());
        let witness = Witness::from(vec![witness_script_bytes]);

        let mut tx = spending_tx(script_sig, LockTime::ZERO, Sequence::MAX);
        tx.input[0].witness = witness;
        let spent_script = ScriptBuf::new_p2sh(&redeem_script.script_hash());
        let tx_bytes = consensus::serialize(&tx);
        verify_with_flags(
            spent_script.as_bytes(),
            5_000,
            &tx_bytes,
            None,
            0,
            VERIFY_P2SH | VERIFY_WITNESS,
        )
        .expect("p2sh-p2wsh witness spend should validate");
    }

    #[test]
    fn verify_script_conditions_then_branch() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_IF)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_ELSE)
            .push_opcode(all::OP_PUSHBYTES_0)
            .push_opcode(all::OP_ENDIF)
            .into_script();
        run_simple_script(script_sig, spent_script).expect("then branch executes");
    }

    #[test]
    fn verify_script_conditions_else_branch() {
        let script_sig = Builder::new()
            .push_opcode(all::OP_PUSHBYTES_0)
            .into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_IF)
            .push_opcode(all::OP_PUSHBYTES_0)
            .push_opcode(all::OP_ELSE)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_ENDIF)
            .into_script();
        run_simple_script(script_sig, spent_script).expect("else branch executes");
    }

    #[test]
    fn verify_script_unbalanced_conditional_fails() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_IF)
            .push_opcode(all::OP_PUSHNUM_1)
            .into_script();
        let failure = run_script_with_ctx_flags_detailed(
            script_sig.clone(),
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("missing endif should fail");
        assert_eq!(failure.script_error, ScriptError::UnbalancedConditional);

        let stray_endif = Builder::new()
            .push_opcode(all::OP_ENDIF)
            .push_opcode(all::OP_PUSHNUM_1)
            .into_script();
        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            stray_endif,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("stray endif should fail");
        assert_eq!(failure.script_error, ScriptError::UnbalancedConditional);
    }

    #[test]
    fn verify_altstack_roundtrip() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_TOALTSTACK)
            .push_opcode(all::OP_FROMALTSTACK)
            .push_opcode(all::OP_DEPTH)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_EQUAL)
            .into_script();
        run_simple_script(script_sig, spent_script).expect("altstack operations succeed");
    }

    #[test]
    fn verify_rot_and_swap_ops() {
        let script_sig = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_PUSHNUM_3)
            .into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_ROT)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_PUSHNUM_3)
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_EQUAL)
            .into_script();
        run_simple_script(script_sig, spent_script).expect("rot/swap maintain order");
    }

    #[test]
    fn verify_pick_and_roll_ops() {
        let pick_sig = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_PUSHNUM_3)
            .into_script();
        let pick_script = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PICK)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_PUSHNUM_1)
            .into_script();
        run_simple_script(pick_sig, pick_script).expect("op_pick duplicates value");

        let roll_sig = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_PUSHNUM_3)
            .push_opcode(all::OP_PUSHNUM_4)
            .into_script();
        let roll_script = Builder::new()
            .push_opcode(all::OP_PUSHNUM_3)
            .push_opcode(all::OP_ROLL)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_PUSHNUM_1)
            .into_script();
        run_simple_script(roll_sig, roll_script).expect("op_roll moves element to top");
    }

    #[test]
    fn verify_arithmetic_and_within() {
        let script_sig = Builder::new()
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_PUSHNUM_3)
            .into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_ADD)
            .push_opcode(all::OP_DUP)
            .push_opcode(all::OP_PUSHNUM_5)
            .push_opcode(all::OP_EQUALVERIFY)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PUSHNUM_6)
            .push_opcode(all::OP_WITHIN)
            .into_script();
        run_simple_script(script_sig, spent_script).expect("arithmetic and within succeed");
    }

    #[test]
    fn verify_sigpushonly_flag() {
        let script_sig = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_DUP)
            .into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_ADD)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_EQUAL)
            .into_script();

        run_simple_script(script_sig.clone(), spent_script.clone()).expect("non push-only allowed");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_SIGPUSHONLY,
        )
        .expect_err("sigpushonly flag rejects non push-only scriptSig");
        assert_eq!(failure.script_error, ScriptError::SigPushOnly);
    }

    #[test]
    fn verify_discourage_upgradable_nops_flag() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_NOP5)
            .push_opcode(all::OP_PUSHNUM_1)
            .into_script();

        run_simple_script(script_sig.clone(), spent_script.clone()).expect("nop allowed");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_DISCOURAGE_UPGRADABLE_NOPS,
        )
        .expect_err("discourage upgradable nops flag rejects reserved nop use");
        assert_eq!(failure.script_error, ScriptError::DiscourageUpgradableNops);
    }

    #[test]
    fn verify_disabled_opcode_grandfathering() {
        // OP_0 OP_IF OP_CAT OP_ENDIF: the disabled opcode sits in a branch
        // that never runs.
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_PUSHBYTES_0)
            .push_opcode(all::OP_IF)
            .push_opcode(all::OP_CAT)
            .push_opcode(all::OP_ENDIF)
            .into_script();

        run_script_with_ctx_flags(
            script_sig.clone(),
            spent_script.clone(),
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect("unreached disabled opcode tolerated under the old rule");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig.clone(),
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_DISABLED_UNEXECUTED,
        )
        .expect_err("unreached disabled opcode fails under the modern rule");
        assert_eq!(failure.script_error, ScriptError::DisabledOpcode);

        // Executed disabled opcodes fail under either rule.
        let executed = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_CAT)
            .into_script();
        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            executed,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("executed disabled opcode always fails");
        assert_eq!(failure.script_error, ScriptError::DisabledOpcode);
    }

    #[test]
    fn verify_stack_limit_boundary() {
        // One element from the input script plus 999 pushes lands exactly on
        // the limit; one more crosses it. Pushes avoid the operation budget.
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let mut at_limit = Builder::new();
        for _ in 0..999 {
            at_limit = at_limit.push_opcode(all::OP_PUSHNUM_1);
        }
        run_simple_script(script_sig.clone(), at_limit.into_script())
            .expect("1000 combined elements are allowed");

        let mut over_limit = Builder::new();
        for _ in 0..1000 {
            over_limit = over_limit.push_opcode(all::OP_PUSHNUM_1);
        }
        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            over_limit.into_script(),
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("1001 combined elements fail");
        assert_eq!(failure.script_error, ScriptError::StackSize);
    }

    #[test]
    fn verify_minimalif_flag() {
        let condition = vec![2u8];
        let script_sig = Builder::new()
            .push_slice(PushBytesBuf::try_from(condition.clone()).unwrap())
            .into_script();
        let spent_script = Builder::new()
            .push_opcode(all::OP_IF)
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_ENDIF)
            .into_script();

        run_simple_script(script_sig.clone(), spent_script.clone()).expect("non minimal true ok");

        run_script_with_ctx_flags(
            script_sig,
            spent_script.clone(),
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_MINIMALIF,
        )
        .expect("MINIMALIF does not apply to legacy scripts");

        let witness_script = spent_script;
        let program = sha256::Hash::hash(witness_script.as_bytes());
        let script_pubkey = Builder::new()
            .push_opcode(all::OP_PUSHBYTES_0)
            .push_slice(PushBytesBuf::try_from(program.to_byte_array().to_vec()).unwrap())
            .into_script();
        let witness = Witness::from(vec![condition, witness_script.as_bytes().to_vec()]);
        let failure = run_witness_script_with_ctx(
            Builder::new().into_script(),
            script_pubkey,
            witness,
            Amount::from_sat(50_000),
            VERIFY_WITNESS | VERIFY_MINIMALIF,
        )
        .expect_err("non-minimal truthy witness branch rejected by MINIMALIF");
        assert_eq!(failure.script_error, ScriptError::MinimalIf);
    }

    #[test]
    fn verify_minimaldata_flag() {
        // 0x07 pushed as a two-byte PUSHDATA1 instead of the direct push.
        let script_sig = ScriptBuf::from_bytes(vec![0x4c, 0x01, 0x07]);
        let spent_script = Builder::new()
            .push_opcode(all::OP_PUSHNUM_7)
            .push_opcode(all::OP_EQUAL)
            .into_script();

        run_simple_script(script_sig.clone(), spent_script.clone())
            .expect("loose encodings allowed without MINIMALDATA");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_MINIMALDATA,
        )
        .expect_err("MINIMALDATA rejects the loose push");
        assert_eq!(failure.script_error, ScriptError::MinimalData);
    }

    #[test]
    fn verify_cltv_rules() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_int(50)
            .push_opcode(all::OP_CLTV)
            .push_opcode(all::OP_DROP)
            .into_script();

        run_script_with_ctx_flags(
            script_sig.clone(),
            spent_script.clone(),
            LockTime::from_consensus(100),
            Sequence::ZERO,
            VERIFY_CHECKLOCKTIMEVERIFY,
        )
        .expect("satisfied locktime passes");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig.clone(),
            spent_script.clone(),
            LockTime::from_consensus(10),
            Sequence::ZERO,
            VERIFY_CHECKLOCKTIMEVERIFY,
        )
        .expect_err("unsatisfied locktime fails");
        assert_eq!(failure.script_error, ScriptError::UnsatisfiedLockTime);

        // A final input sequence disables the check.
        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::from_consensus(100),
            Sequence::MAX,
            VERIFY_CHECKLOCKTIMEVERIFY,
        )
        .expect_err("final sequence rejects CLTV");
        assert_eq!(failure.script_error, ScriptError::UnsatisfiedLockTime);
    }

    #[test]
    fn verify_csv_rules() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let spent_script = Builder::new()
            .push_int(5)
            .push_opcode(all::OP_CSV)
            .push_opcode(all::OP_DROP)
            .into_script();

        run_script_with_ctx_flags(
            script_sig.clone(),
            spent_script.clone(),
            LockTime::ZERO,
            Sequence::from_consensus(10),
            VERIFY_CHECKSEQUENCEVERIFY,
        )
        .expect("satisfied relative lock passes");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::from_consensus(2),
            VERIFY_CHECKSEQUENCEVERIFY,
        )
        .expect_err("unsatisfied relative lock fails");
        assert_eq!(failure.script_error, ScriptError::UnsatisfiedLockTime);
    }

    #[test]
    fn verify_cleanstack_flag() {
        let script_sig = Builder::new()
            .push_opcode(all::OP_PUSHNUM_1)
            .push_opcode(all::OP_PUSHNUM_1)
            .into_script();
        let spent_script = Builder::new().push_opcode(all::OP_NOP).into_script();

        run_simple_script(script_sig.clone(), spent_script.clone())
            .expect("leftover elements tolerated without CLEANSTACK");

        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_CLEANSTACK | VERIFY_P2SH,
        )
        .expect_err("CLEANSTACK rejects leftovers");
        assert_eq!(failure.script_error, ScriptError::CleanStack);
    }

    #[test]
    fn verify_eval_false_paths() {
        let script_sig = Builder::new()
            .push_opcode(all::OP_PUSHBYTES_0)
            .into_script();
        let spent_script = Builder::new().push_opcode(all::OP_NOP).into_script();
        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("false top element fails");
        assert_eq!(failure.script_error, ScriptError::EvalFalse);

        let failure = run_script_with_ctx_flags_detailed(
            Builder::new().into_script(),
            Builder::new().into_script(),
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("empty stack fails");
        assert_eq!(failure.script_error, ScriptError::EvalFalse);
    }

    #[test]
    fn verify_truncated_push_fails() {
        // Script claims a 5-byte push but carries 2 bytes.
        let spent_script = ScriptBuf::from_bytes(vec![0x05, 0x01, 0x02]);
        let failure = run_script_with_ctx_flags_detailed(
            Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script(),
            spent_script,
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("underflowed push is unexecutable");
        assert_eq!(failure.script_error, ScriptError::BadOpcode);
    }

    #[test]
    fn verify_opcount_budget() {
        let script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let mut spent_builder = Builder::new();
        for _ in 0..202 {
            spent_builder = spent_builder.push_opcode(all::OP_NOP);
        }
        let failure = run_script_with_ctx_flags_detailed(
            script_sig,
            spent_builder.into_script(),
            LockTime::ZERO,
            Sequence::MAX,
            VERIFY_NONE,
        )
        .expect_err("202 counted operations exceed the budget");
        assert_eq!(failure.script_error, ScriptError::OpCount);
    }
}
