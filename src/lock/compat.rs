// Lock mode compatibility and strength matrices
use super::types::LockMode;

// Row i, bit j: mode i is compatible with mode j.
// Order is IS, IX, S, X, AUTO_INC.
//
//         IS  IX  S   X   AI
//   IS    +   +   +   -   +
//   IX    +   +   -   -   +
//   S     +   -   +   -   -
//   X     -   -   -   -   -
//   AI    +   +   -   -   -
const COMPATIBILITY: [u8; 5] = [
    0b10111, // IS
    0b10011, // IX
    0b00101, // S
    0b00000, // X
    0b00011, // AUTO_INC
];

// Row i, bit j: mode i is stronger than or equal to mode j.
//
//         IS  IX  S   X   AI
//   IS    +   -   -   -   -
//   IX    +   +   -   -   -
//   S     +   -   +   -   -
//   X     +   +   +   +   +
//   AI    -   -   -   -   +
const STRENGTH: [u8; 5] = [
    0b00001, // IS
    0b00011, // IX
    0b00101, // S
    0b11111, // X
    0b10000, // AUTO_INC
];

/// True if locks of mode `a` and `b` held by different transactions can coexist.
#[inline]
pub fn compatible(a: LockMode, b: LockMode) -> bool {
    COMPATIBILITY[a.index()] & (1 << b.index()) != 0
}

/// True if a lock of mode `a` covers everything a lock of mode `b` grants.
#[inline]
pub fn stronger_or_equal(a: LockMode, b: LockMode) -> bool {
    STRENGTH[a.index()] & (1 << b.index()) != 0
}
