//! Opcode constants and encoded-size tables.
//!
//! The offset tracker needs exactly two things from the instruction set:
//! the encoded size of every fixed-size instruction, and the constants that
//! delimit the families whose size depends on the operand encoding (the
//! local-variable loads/stores, the constant-pool loads, the two switch
//! forms, and the wide jump variants).

/// Push byte.
pub const BIPUSH: u8 = 0x10;
/// Push short.
pub const SIPUSH: u8 = 0x11;
/// Load constant, one-byte pool index.
pub const LDC: u8 = 0x12;
/// Load constant, two-byte pool index.
pub const LDC_W: u8 = 0x13;
/// Load long/double constant, two-byte pool index.
pub const LDC2_W: u8 = 0x14;
/// First canonical load (`iload`).
pub const ILOAD: u8 = 0x15;
/// Last canonical load (`aload`).
pub const ALOAD: u8 = 0x19;
/// First compressed load (`iload_0`).
pub const ILOAD_0: u8 = 0x1a;
/// Last compressed load (`aload_3`).
pub const ALOAD_3: u8 = 0x2d;
/// First canonical store (`istore`).
pub const ISTORE: u8 = 0x36;
/// Last canonical store (`astore`).
pub const ASTORE: u8 = 0x3a;
/// First compressed store (`istore_0`).
pub const ISTORE_0: u8 = 0x3b;
/// Last compressed store (`astore_3`).
pub const ASTORE_3: u8 = 0x4e;
/// Increment local by constant.
pub const IINC: u8 = 0x84;
/// First two-byte-offset branch (`ifeq`).
pub const IFEQ: u8 = 0x99;
/// Unconditional branch.
pub const GOTO: u8 = 0xa7;
/// Subroutine jump.
pub const JSR: u8 = 0xa8;
/// Return from subroutine.
pub const RET: u8 = 0xa9;
/// Bounded-range case dispatch.
pub const TABLESWITCH: u8 = 0xaa;
/// Linear case-list dispatch.
pub const LOOKUPSWITCH: u8 = 0xab;
/// Interface call, with count and padding operands.
pub const INVOKEINTERFACE: u8 = 0xb9;
/// Dynamic call site.
pub const INVOKEDYNAMIC: u8 = 0xba;
/// Allocate object.
pub const NEW: u8 = 0xbb;
/// Allocate primitive array.
pub const NEWARRAY: u8 = 0xbc;
/// Cast check.
pub const CHECKCAST: u8 = 0xc0;
/// Type test.
pub const INSTANCEOF: u8 = 0xc1;
/// Wide-operand prefix.
pub const WIDE: u8 = 0xc4;
/// Allocate multi-dimensional array.
pub const MULTIANEWARRAY: u8 = 0xc5;
/// Branch if null.
pub const IFNULL: u8 = 0xc6;
/// Branch if non-null.
pub const IFNONNULL: u8 = 0xc7;
/// Unconditional branch, four-byte offset.
pub const GOTO_W: u8 = 0xc8;
/// Subroutine jump, four-byte offset.
pub const JSR_W: u8 = 0xc9;

/// Bridge-method access flag on a method declaration.
pub const ACC_BRIDGE: u32 = 0x0040;

/// Encoded size of a fixed-size instruction, or `None` for the families
/// whose size depends on the operand encoding or on raw stream contents.
pub const fn fixed_size(opcode: u8) -> Option<usize> {
    match opcode {
        // nop through dconst_1
        0x00..=0x0f => Some(1),
        BIPUSH => Some(2),
        SIPUSH => Some(3),
        // constant-pool loads: narrow/wide variants, decided from the stream
        LDC..=LDC2_W => None,
        // canonical loads: compressed/short/wide, decided from the stream
        ILOAD..=ALOAD => None,
        // compressed loads through array loads
        ILOAD_0..=0x35 => Some(1),
        // canonical stores: compressed/short/wide, decided from the stream
        ISTORE..=ASTORE => None,
        // compressed stores through array stores
        ISTORE_0..=0x56 => Some(1),
        // stack manipulation and arithmetic
        0x57..=0x83 => Some(1),
        IINC => None,
        // conversions and comparisons
        0x85..=0x98 => Some(1),
        // conditional and unconditional branches with two-byte offsets
        IFEQ..=JSR => Some(3),
        RET => None,
        TABLESWITCH | LOOKUPSWITCH => None,
        // ireturn through return
        0xac..=0xb1 => Some(1),
        // field access and plain invokes
        0xb2..=0xb8 => Some(3),
        INVOKEINTERFACE => Some(5),
        INVOKEDYNAMIC => Some(5),
        NEW => Some(3),
        NEWARRAY => Some(2),
        // anewarray
        0xbd => Some(3),
        // arraylength, athrow
        0xbe..=0xbf => Some(1),
        CHECKCAST | INSTANCEOF => Some(3),
        // monitorenter, monitorexit
        0xc2..=0xc3 => Some(1),
        WIDE => None,
        MULTIANEWARRAY => Some(4),
        IFNULL | IFNONNULL => Some(3),
        GOTO_W | JSR_W => Some(5),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sizes_match_the_instruction_format() {
        assert_eq!(fixed_size(0x00), Some(1)); // nop
        assert_eq!(fixed_size(BIPUSH), Some(2));
        assert_eq!(fixed_size(SIPUSH), Some(3));
        assert_eq!(fixed_size(0xb6), Some(3)); // invokevirtual
        assert_eq!(fixed_size(INVOKEINTERFACE), Some(5));
        assert_eq!(fixed_size(MULTIANEWARRAY), Some(4));
        assert_eq!(fixed_size(GOTO_W), Some(5));
    }

    #[test]
    fn variable_families_have_no_fixed_size() {
        for opcode in [LDC, LDC_W, ILOAD, ASTORE, IINC, RET, TABLESWITCH, LOOKUPSWITCH, WIDE] {
            assert_eq!(fixed_size(opcode), None, "opcode {opcode:#04x}");
        }
    }

    #[test]
    fn undefined_opcodes_have_no_size() {
        assert_eq!(fixed_size(0xcb), None);
        assert_eq!(fixed_size(0xff), None);
    }
}
