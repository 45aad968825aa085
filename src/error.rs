//! Script evaluation failure taxonomy.

use core::fmt;

/// Reason a script evaluation failed.
///
/// `Ok` is the sentinel used when a verification error originates outside the
/// interpreter (for example a transaction that fails to deserialize). Every
/// other variant identifies the first violated rule; the reason is diagnostic
/// only and never feeds back into the verdict.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Ok,
    Unknown,
    EvalFalse,
    OpReturn,
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    SigopBudget,
    SigCount,
    PubkeyCount,
    Verify,
    EqualVerify,
    CheckSigVerify,
    CheckMultiSigVerify,
    NumEqualVerify,
    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,
    NegativeLockTime,
    UnsatisfiedLockTime,
    NumberOverflow,
    SigHashType,
    SigDer,
    MinimalData,
    SigPushOnly,
    SigHighS,
    SigNullDummy,
    PubkeyType,
    CleanStack,
    MinimalIf,
    NullFail,
    DiscourageUpgradableNops,
    DiscourageUpgradableWitnessProgram,
    DiscourageUpgradableTaprootVersion,
    DiscourageOpSuccess,
    DiscourageUpgradablePubkeyType,
    WitnessProgramWrongLength,
    WitnessProgramWitnessEmpty,
    WitnessProgramMismatch,
    WitnessMalleated,
    WitnessMalleatedP2SH,
    WitnessUnexpected,
    WitnessPubkeyType,
    SchnorrSigSize,
    SchnorrSigHashType,
    SchnorrSig,
    TaprootWrongControlSize,
    TapscriptValidationWeight,
    TapscriptCheckMultiSig,
}

impl ScriptError {
    pub fn description(self) -> &'static str {
        use ScriptError::*;

        match self {
            Ok => "no script error recorded",
            Unknown => "unknown script error",
            EvalFalse => "script evaluated to false",
            OpReturn => "OP_RETURN encountered",
            ScriptSize => "script exceeds maximum size",
            PushSize => "push exceeds maximum element size",
            OpCount => "operation count limit exceeded",
            StackSize => "combined stack size limit exceeded",
            SigopBudget => "signature operation budget exceeded",
            SigCount => "signature count out of range",
            PubkeyCount => "public key count out of range",
            Verify => "OP_VERIFY failed",
            EqualVerify => "OP_EQUALVERIFY failed",
            CheckSigVerify => "OP_CHECKSIGVERIFY failed",
            CheckMultiSigVerify => "OP_CHECKMULTISIGVERIFY failed",
            NumEqualVerify => "OP_NUMEQUALVERIFY failed",
            BadOpcode => "invalid or malformed opcode",
            DisabledOpcode => "disabled opcode encountered",
            InvalidStackOperation => "stack operation on insufficient stack",
            InvalidAltstackOperation => "altstack operation on empty altstack",
            UnbalancedConditional => "unbalanced conditional",
            NegativeLockTime => "negative lock time operand",
            UnsatisfiedLockTime => "lock time requirement not satisfied",
            NumberOverflow => "numeric operand exceeds allowed width",
            SigHashType => "invalid sighash type",
            SigDer => "signature violates DER encoding rules",
            MinimalData => "data push is not minimally encoded",
            SigPushOnly => "signature script is not push only",
            SigHighS => "signature S value is not low",
            SigNullDummy => "multisig dummy element is not null",
            PubkeyType => "public key encoding is invalid",
            CleanStack => "stack is not clean after evaluation",
            MinimalIf => "conditional argument is not minimal",
            NullFail => "failed signature is not null",
            DiscourageUpgradableNops => "upgradable NOP used",
            DiscourageUpgradableWitnessProgram => "upgradable witness version used",
            DiscourageUpgradableTaprootVersion => "upgradable taproot leaf version used",
            DiscourageOpSuccess => "OP_SUCCESS opcode used",
            DiscourageUpgradablePubkeyType => "upgradable taproot pubkey type used",
            WitnessProgramWrongLength => "witness program has wrong length",
            WitnessProgramWitnessEmpty => "witness program was passed an empty witness",
            WitnessProgramMismatch => "witness program hash mismatch",
            WitnessMalleated => "witness requires empty signature script",
            WitnessMalleatedP2SH => "witness requires canonical P2SH signature script",
            WitnessUnexpected => "witness provided for non-witness script",
            WitnessPubkeyType => "witness public key is not compressed",
            SchnorrSigSize => "schnorr signature has wrong size",
            SchnorrSigHashType => "schnorr signature has invalid sighash type",
            SchnorrSig => "schnorr signature verification failed",
            TaprootWrongControlSize => "taproot control block has wrong size",
            TapscriptValidationWeight => "tapscript validation weight exceeded",
            TapscriptCheckMultiSig => "OP_CHECKMULTISIG is invalid in tapscript",
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScriptError {}
