//! A single decoded script instruction.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};
#[cfg(feature = "std")]
use std::vec::Vec;

use bitcoin::opcodes::{all, Opcode};

use crate::opcode::{
    self, is_payload, opcode_from_positive, opcode_from_size, MAX_DIRECT_PUSH,
};

const PUSHDATA1: u8 = 0x4c;
const PUSHDATA2: u8 = 0x4d;
const PUSHDATA4: u8 = 0x4e;

/// One instruction: an opcode plus its payload, if any.
///
/// Parsing never fails. When the stream ends before the length the opcode
/// implied, the operation is marked `underflow` and swallows the remainder of
/// the stream verbatim (length prefix included), so serialization reproduces
/// the input bytes exactly and size accounting stays correct. An underflowed
/// operation is never executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    opcode: Opcode,
    data: Vec<u8>,
    underflow: bool,
}

impl Operation {
    /// Plain opcode with no payload.
    pub fn from_opcode(opcode: Opcode) -> Self {
        Self {
            opcode,
            data: Vec::new(),
            underflow: false,
        }
    }

    /// Push operation for `data`.
    ///
    /// With `minimal` set the shortest legal encoding is chosen, including the
    /// numeric shorthands. Otherwise the "nominal" form is used: one of the
    /// three explicit-length pushdata opcodes, whatever the payload size.
    /// Both encodings exist on chain, so both must be constructible.
    pub fn from_data(data: &[u8], minimal: bool) -> Self {
        let opcode = if minimal {
            minimal_push_opcode(data)
        } else {
            nominal_push_opcode(data.len())
        };
        let data = match opcode.to_u8() {
            // Numeric shorthands carry their value in the opcode itself.
            0x4f | 0x51..=0x60 => Vec::new(),
            _ => data.to_vec(),
        };
        Self {
            opcode,
            data,
            underflow: false,
        }
    }

    /// Decodes one operation starting at `*cursor`, advancing the cursor past
    /// everything consumed. Returns `None` only when the cursor is already at
    /// the end of the stream.
    pub fn read(bytes: &[u8], cursor: &mut usize) -> Option<Self> {
        if *cursor >= bytes.len() {
            return None;
        }

        let start = *cursor;
        let opcode = Opcode::from(bytes[start]);
        *cursor += 1;

        if !is_payload(opcode) {
            return Some(Self::from_opcode(opcode));
        }

        let value = opcode.to_u8();
        let (prefix_width, declared) = if value as usize <= MAX_DIRECT_PUSH {
            (0usize, Some(value as usize))
        } else {
            let width = match value {
                PUSHDATA1 => 1,
                PUSHDATA2 => 2,
                _ => 4,
            };
            (width, read_length(bytes, *cursor, width))
        };

        let payload_at = *cursor + prefix_width;
        let payload_end = declared.and_then(|length| payload_at.checked_add(length));
        match (declared, payload_end) {
            (Some(_), Some(end)) if end <= bytes.len() => {
                // The declared length is bounded by the remaining input, so
                // the allocation below cannot exceed the script size.
                let data = bytes[payload_at..end].to_vec();
                *cursor = end;
                Some(Self {
                    opcode,
                    data,
                    underflow: false,
                })
            }
            _ => {
                // Truncated length field or payload: keep the raw remainder.
                let data = bytes[start + 1..].to_vec();
                *cursor = bytes.len();
                Some(Self {
                    opcode,
                    data,
                    underflow: true,
                })
            }
        }
    }

    /// Appends the wire encoding to `out`. Round-trips exactly for anything
    /// produced by [`Operation::read`].
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.opcode.to_u8());
        if self.underflow {
            out.extend_from_slice(&self.data);
            return;
        }
        match self.opcode.to_u8() {
            PUSHDATA1 => out.push(self.data.len() as u8),
            PUSHDATA2 => out.extend_from_slice(&(self.data.len() as u16).to_le_bytes()),
            PUSHDATA4 => out.extend_from_slice(&(self.data.len() as u32).to_le_bytes()),
            _ => {}
        }
        out.extend_from_slice(&self.data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.write(&mut out);
        out
    }

    /// Wire size in bytes, underflow remainder included.
    pub fn serialized_size(&self) -> usize {
        let prefix = if self.underflow {
            0
        } else {
            match self.opcode.to_u8() {
                PUSHDATA1 => 1,
                PUSHDATA2 => 2,
                PUSHDATA4 => 4,
                _ => 0,
            }
        };
        1 + prefix + self.data.len()
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_underflow(&self) -> bool {
        self.underflow
    }

    pub fn is_valid(&self) -> bool {
        !self.underflow
    }

    pub fn is_push(&self) -> bool {
        opcode::is_push(self.opcode)
    }

    pub fn is_relaxed_push(&self) -> bool {
        opcode::is_relaxed_push(self.opcode)
    }

    pub fn is_counted(&self) -> bool {
        opcode::is_counted(self.opcode)
    }

    pub fn is_conditional(&self) -> bool {
        opcode::is_conditional(self.opcode)
    }

    pub fn is_disabled(&self) -> bool {
        opcode::is_disabled(self.opcode)
    }

    /// Whether this push uses the shortest encoding its payload admits.
    /// Payload-free pushes (OP_0, the numeric shorthands) are minimal by
    /// construction.
    pub fn is_minimal_push(&self) -> bool {
        if self.underflow {
            return false;
        }
        if !is_payload(self.opcode) {
            return opcode::is_push(self.opcode);
        }
        self.opcode == minimal_push_opcode(&self.data)
    }

    /// Whether this push uses an explicit-length pushdata opcode.
    pub fn is_nominal_push(&self) -> bool {
        matches!(self.opcode.to_u8(), PUSHDATA1 | PUSHDATA2 | PUSHDATA4)
    }
}

fn minimal_push_opcode(data: &[u8]) -> Opcode {
    if data.is_empty() {
        return all::OP_PUSHBYTES_0;
    }
    if data.len() == 1 {
        if data[0] == 0x81 {
            return all::OP_PUSHNUM_NEG1;
        }
        if (1..=16).contains(&data[0]) {
            return opcode_from_positive(data[0]).expect("range checked");
        }
    }
    if let Some(op) = opcode_from_size(data.len()) {
        return op;
    }
    nominal_push_opcode(data.len())
}

fn nominal_push_opcode(size: usize) -> Opcode {
    if size <= 0xff {
        all::OP_PUSHDATA1
    } else if size <= 0xffff {
        all::OP_PUSHDATA2
    } else {
        all::OP_PUSHDATA4
    }
}

fn read_length(bytes: &[u8], cursor: usize, width: usize) -> Option<usize> {
    if cursor + width > bytes.len() {
        return None;
    }
    let mut length = 0usize;
    for i in 0..width {
        length |= (bytes[cursor + i] as usize) << (8 * i);
    }
    Some(length)
}
