use serde::{Deserialize, Serialize};

use crate::PatternId;

/// Either an index into the owning song's `sequence` vec, or an absolute ARAM
/// address for jumps whose target does not align to a known sequence slot (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeqTarget {
    Index(usize),
    Absolute(u16),
}

/// One element of a song's top-level sequence (§3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SeqOp {
    PlayPattern { pattern_id: PatternId, track_table_addr: u16 },
    /// Finite repeat; `count` is the raw opcode byte (`[0x01, 0x7F]`).
    JumpTimes { count: u8, target: SeqTarget },
    /// Unconditional jump; `opcode` preserves the raw byte (`[0x82, 0xFF]`,
    /// minus fast-forward opcodes) for byte-exact re-encoding of engine
    /// variants that use distinct opcodes in that range.
    AlwaysJump { opcode: u8, target: SeqTarget },
    FastForwardOn,
    FastForwardOff,
    EndSequence,
}
