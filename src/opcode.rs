//! Opcode classification table.
//!
//! Single source of truth for what each of the 256 instruction values is
//! allowed to do. Every other component (operation parsing, script analysis,
//! the execution engine) derives its behaviour from the predicates here
//! instead of re-deriving opcode ranges locally.

use bitcoin::opcodes::{all, Opcode};

/// Largest satoshi-era direct push (the opcode byte doubles as the length).
pub const MAX_DIRECT_PUSH: usize = 75;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_PUSHNUM_NEG1: u8 = 0x4f;
const OP_RESERVED: u8 = 0x50;
const OP_PUSHNUM_1: u8 = 0x51;
const OP_PUSHNUM_16: u8 = 0x60;
const OP_NOP10: u8 = 0xb9;
const OP_CHECKSIGADD: u8 = 0xba;

/// Any opcode that pushes a value, including the numeric shorthands but
/// excluding the reserved hole at 0x50.
pub fn is_push(op: Opcode) -> bool {
    op.to_u8() <= OP_PUSHNUM_16 && op.to_u8() != OP_RESERVED
}

/// The BIP62 "push only" relaxation: everything up to OP_16, reserved slot
/// included.
pub fn is_relaxed_push(op: Opcode) -> bool {
    op.to_u8() <= OP_PUSHNUM_16
}

/// Opcodes followed by payload bytes (direct pushes and the three explicit
/// length forms).
pub fn is_payload(op: Opcode) -> bool {
    matches!(op.to_u8(), 0x01..=OP_PUSHDATA4)
}

/// Counts toward the per-script operation budget (everything above OP_16).
pub fn is_counted(op: Opcode) -> bool {
    op.to_u8() > OP_PUSHNUM_16
}

/// Pushes a small number without payload (OP_1NEGATE, OP_1..OP_16).
pub fn is_numeric(op: Opcode) -> bool {
    is_positive(op) || op.to_u8() == OP_PUSHNUM_NEG1
}

/// OP_1 through OP_16.
pub fn is_positive(op: Opcode) -> bool {
    (OP_PUSHNUM_1..=OP_PUSHNUM_16).contains(&op.to_u8())
}

/// Branch-control opcodes, executed even inside a skipped branch.
pub fn is_conditional(op: Opcode) -> bool {
    matches!(op, all::OP_IF | all::OP_NOTIF | all::OP_ELSE | all::OP_ENDIF)
}

/// Permanently disabled opcodes (CAT, SUBSTR, the bitwise and multiplicative
/// family). Whether these fail when sitting in a skipped branch is governed
/// by an activation flag, not decided here.
pub fn is_disabled(op: Opcode) -> bool {
    matches!(
        op.to_u8(),
        0x7e | 0x7f | 0x80 | 0x81 | 0x83 | 0x84 | 0x85 | 0x86 // CAT..XOR
            | 0x8d | 0x8e // 2MUL, 2DIV
            | 0x95..=0x99 // MUL, DIV, MOD, LSHIFT, RSHIFT
    )
}

/// Reserved opcodes: fail only when actually executed.
pub fn is_reserved(op: Opcode) -> bool {
    matches!(op.to_u8(), OP_RESERVED | 0x62 | 0x89 | 0x8a)
}

/// Opcodes with no assigned semantics. OP_VERIF/OP_VERNOTIF fail even inside
/// a skipped branch; the upper range fails when executed.
pub fn is_invalid(op: Opcode) -> bool {
    matches!(op.to_u8(), 0x65 | 0x66) || op.to_u8() > OP_CHECKSIGADD
}

/// The two conditional verbs that poison a script wherever they appear.
pub fn is_invalid_unexecuted(op: Opcode) -> bool {
    matches!(op.to_u8(), 0x65 | 0x66)
}

/// Mirrors Bitcoin Core's `IsOpSuccess` table (BIP342). Inside tapscript
/// these opcodes, the disabled set among them, unconditionally succeed.
pub fn is_success(op: Opcode) -> bool {
    matches!(
        op.to_u8(),
        80 | 98 | 126..=129 | 131..=134 | 137..=138 | 141..=142 | 149..=153 | 187..=254
    )
}

/// The canonical (shortest) push opcode for a payload of `size` bytes that
/// can be expressed as a direct push.
pub fn opcode_from_size(size: usize) -> Option<Opcode> {
    if size <= MAX_DIRECT_PUSH {
        Some(Opcode::from(size as u8))
    } else {
        None
    }
}

/// Dedicated opcode for a small positive integer (1..=16).
pub fn opcode_from_positive(value: u8) -> Option<Opcode> {
    if (1..=16).contains(&value) {
        Some(Opcode::from(OP_PUSHNUM_1 + value - 1))
    } else {
        None
    }
}

/// Dedicated opcode for a witness version (0..=16).
pub fn opcode_from_version(version: u8) -> Option<Opcode> {
    match version {
        0 => Some(all::OP_PUSHBYTES_0),
        _ => opcode_from_positive(version),
    }
}

/// Inverse of [`opcode_from_positive`].
pub fn opcode_to_positive(op: Opcode) -> Option<u8> {
    if is_positive(op) {
        Some(op.to_u8() - OP_PUSHNUM_1 + 1)
    } else {
        None
    }
}

/// Canonical mnemonic for a named opcode. Direct pushes (0x01..=0x4b) carry
/// data rather than a name and map to `None`, keeping the mapping bijective
/// over the named set.
pub fn mnemonic(op: Opcode) -> Option<&'static str> {
    let name = match op.to_u8() {
        0x00 => "OP_0",
        0x01..=0x4b => return None,
        OP_PUSHDATA1 => "OP_PUSHDATA1",
        OP_PUSHDATA2 => "OP_PUSHDATA2",
        OP_PUSHDATA4 => "OP_PUSHDATA4",
        OP_PUSHNUM_NEG1 => "OP_1NEGATE",
        OP_RESERVED => "OP_RESERVED",
        0x51 => "OP_1",
        0x52 => "OP_2",
        0x53 => "OP_3",
        0x54 => "OP_4",
        0x55 => "OP_5",
        0x56 => "OP_6",
        0x57 => "OP_7",
        0x58 => "OP_8",
        0x59 => "OP_9",
        0x5a => "OP_10",
        0x5b => "OP_11",
        0x5c => "OP_12",
        0x5d => "OP_13",
        0x5e => "OP_14",
        0x5f => "OP_15",
        0x60 => "OP_16",
        0x61 => "OP_NOP",
        0x62 => "OP_VER",
        0x63 => "OP_IF",
        0x64 => "OP_NOTIF",
        0x65 => "OP_VERIF",
        0x66 => "OP_VERNOTIF",
        0x67 => "OP_ELSE",
        0x68 => "OP_ENDIF",
        0x69 => "OP_VERIFY",
        0x6a => "OP_RETURN",
        0x6b => "OP_TOALTSTACK",
        0x6c => "OP_FROMALTSTACK",
        0x6d => "OP_2DROP",
        0x6e => "OP_2DUP",
        0x6f => "OP_3DUP",
        0x70 => "OP_2OVER",
        0x71 => "OP_2ROT",
        0x72 => "OP_2SWAP",
        0x73 => "OP_IFDUP",
        0x74 => "OP_DEPTH",
        0x75 => "OP_DROP",
        0x76 => "OP_DUP",
        0x77 => "OP_NIP",
        0x78 => "OP_OVER",
        0x79 => "OP_PICK",
        0x7a => "OP_ROLL",
        0x7b => "OP_ROT",
        0x7c => "OP_SWAP",
        0x7d => "OP_TUCK",
        0x7e => "OP_CAT",
        0x7f => "OP_SUBSTR",
        0x80 => "OP_LEFT",
        0x81 => "OP_RIGHT",
        0x82 => "OP_SIZE",
        0x83 => "OP_INVERT",
        0x84 => "OP_AND",
        0x85 => "OP_OR",
        0x86 => "OP_XOR",
        0x87 => "OP_EQUAL",
        0x88 => "OP_EQUALVERIFY",
        0x89 => "OP_RESERVED1",
        0x8a => "OP_RESERVED2",
        0x8b => "OP_1ADD",
        0x8c => "OP_1SUB",
        0x8d => "OP_2MUL",
        0x8e => "OP_2DIV",
        0x8f => "OP_NEGATE",
        0x90 => "OP_ABS",
        0x91 => "OP_NOT",
        0x92 => "OP_0NOTEQUAL",
        0x93 => "OP_ADD",
        0x94 => "OP_SUB",
        0x95 => "OP_MUL",
        0x96 => "OP_DIV",
        0x97 => "OP_MOD",
        0x98 => "OP_LSHIFT",
        0x99 => "OP_RSHIFT",
        0x9a => "OP_BOOLAND",
        0x9b => "OP_BOOLOR",
        0x9c => "OP_NUMEQUAL",
        0x9d => "OP_NUMEQUALVERIFY",
        0x9e => "OP_NUMNOTEQUAL",
        0x9f => "OP_LESSTHAN",
        0xa0 => "OP_GREATERTHAN",
        0xa1 => "OP_LESSTHANOREQUAL",
        0xa2 => "OP_GREATERTHANOREQUAL",
        0xa3 => "OP_MIN",
        0xa4 => "OP_MAX",
        0xa5 => "OP_WITHIN",
        0xa6 => "OP_RIPEMD160",
        0xa7 => "OP_SHA1",
        0xa8 => "OP_SHA256",
        0xa9 => "OP_HASH160",
        0xaa => "OP_HASH256",
        0xab => "OP_CODESEPARATOR",
        0xac => "OP_CHECKSIG",
        0xad => "OP_CHECKSIGVERIFY",
        0xae => "OP_CHECKMULTISIG",
        0xaf => "OP_CHECKMULTISIGVERIFY",
        0xb0 => "OP_NOP1",
        0xb1 => "OP_CHECKLOCKTIMEVERIFY",
        0xb2 => "OP_CHECKSEQUENCEVERIFY",
        0xb3 => "OP_NOP4",
        0xb4 => "OP_NOP5",
        0xb5 => "OP_NOP6",
        0xb6 => "OP_NOP7",
        0xb7 => "OP_NOP8",
        0xb8 => "OP_NOP9",
        OP_NOP10 => "OP_NOP10",
        OP_CHECKSIGADD => "OP_CHECKSIGADD",
        _ => return None,
    };
    Some(name)
}

/// Looks up an opcode by mnemonic, accepting the historical aliases.
pub fn opcode_from_mnemonic(token: &str) -> Option<Opcode> {
    match token {
        "OP_FALSE" => return Some(all::OP_PUSHBYTES_0),
        "OP_TRUE" => return Some(all::OP_PUSHNUM_1),
        "OP_NOP2" => return Some(all::OP_CLTV),
        "OP_NOP3" => return Some(all::OP_CSV),
        _ => {}
    }
    for value in 0x00..=0xff_u16 {
        let op = Opcode::from(value as u8);
        if mnemonic(op) == Some(token) {
            return Some(op);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_value_classifies() {
        for value in 0x00..=0xff_u16 {
            let op = Opcode::from(value as u8);
            // A push never counts toward the op budget and vice versa.
            assert_ne!(is_push(op), is_counted(op) || value == 0x50);
            if is_positive(op) {
                assert!(is_numeric(op));
                assert!(is_push(op));
            }
            if is_payload(op) {
                assert!(is_push(op));
                assert!(!is_counted(op));
            }
        }
    }

    #[test]
    fn from_size_is_the_minimal_direct_push() {
        assert_eq!(opcode_from_size(0), Some(all::OP_PUSHBYTES_0));
        assert_eq!(opcode_from_size(1), Some(all::OP_PUSHBYTES_1));
        assert_eq!(opcode_from_size(75), Some(all::OP_PUSHBYTES_75));
        assert_eq!(opcode_from_size(76), None);
    }

    #[test]
    fn positive_and_version_mappings_agree() {
        assert_eq!(opcode_from_positive(0), None);
        assert_eq!(opcode_from_positive(1), Some(all::OP_PUSHNUM_1));
        assert_eq!(opcode_from_positive(16), Some(all::OP_PUSHNUM_16));
        assert_eq!(opcode_from_positive(17), None);
        assert_eq!(opcode_from_version(0), Some(all::OP_PUSHBYTES_0));
        assert_eq!(opcode_from_version(16), Some(all::OP_PUSHNUM_16));
        for n in 1..=16 {
            assert_eq!(opcode_to_positive(opcode_from_positive(n).unwrap()), Some(n));
        }
    }

    #[test]
    fn mnemonics_roundtrip_over_named_opcodes() {
        let mut named = 0;
        for value in 0x00..=0xff_u16 {
            let op = Opcode::from(value as u8);
            if let Some(name) = mnemonic(op) {
                named += 1;
                assert_eq!(opcode_from_mnemonic(name), Some(op), "{name}");
            }
        }
        // 0x00 plus 0x4c..=0xba; direct pushes and undefined values are unnamed.
        assert_eq!(named, 1 + (0xba - 0x4c + 1));
        assert_eq!(opcode_from_mnemonic("OP_NOP2"), Some(all::OP_CLTV));
        assert_eq!(opcode_from_mnemonic("OP_TRUE"), Some(all::OP_PUSHNUM_1));
        assert_eq!(opcode_from_mnemonic("OP_GARBAGE"), None);
    }

    #[test]
    fn disabled_set_matches_consensus() {
        let disabled = [
            all::OP_CAT,
            all::OP_SUBSTR,
            all::OP_LEFT,
            all::OP_RIGHT,
            all::OP_INVERT,
            all::OP_AND,
            all::OP_OR,
            all::OP_XOR,
            all::OP_2MUL,
            all::OP_2DIV,
            all::OP_MUL,
            all::OP_DIV,
            all::OP_MOD,
            all::OP_LSHIFT,
            all::OP_RSHIFT,
        ];
        for op in disabled {
            assert!(is_disabled(op), "{op:?}");
            // Every disabled opcode became OP_SUCCESS under tapscript.
            assert!(is_success(op), "{op:?}");
        }
        assert!(!is_disabled(all::OP_ADD));
    }

    #[test]
    fn op_success_table_boundaries() {
        assert!(is_success(Opcode::from(80)));
        assert!(is_success(Opcode::from(98)));
        assert!(is_success(Opcode::from(187)));
        assert!(is_success(Opcode::from(254)));
        assert!(!is_success(Opcode::from(255)));
        assert!(!is_success(all::OP_CHECKSIG));
        assert!(!is_success(all::OP_CHECKSIGADD));
    }
}
