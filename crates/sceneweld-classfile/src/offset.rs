//! Bytecode offset tracking.
//!
//! Extended annotations on instruction sites are keyed by the byte offset
//! of their owning instruction, but the visitor contract never exposes
//! offsets, so [`CodeOffsets`] replays the instruction-size arithmetic of
//! the class-file format alongside the traversal. Most sizes come from a
//! static per-opcode table; the rest are recovered from the raw bytes at
//! the cursor, because the callbacks do not distinguish narrow, wide and
//! compressed encodings.
//!
//! The cursor must stay exactly in step with the byte stream. Every raw
//! read doubles as a cross-check against the callback, and any disagreement
//! is a fatal [`MergeError::OffsetDesync`]: once the arithmetic drifts,
//! every later offset in the method is garbage.

use sceneweld_core::location::MethodKey;

use crate::error::{MergeError, MergeResult};
use crate::opcode;
use crate::visit::Insn;

/// Tracks the byte offset, relative to the start of the current method's
/// instruction stream, of the instruction most recently completed.
///
/// One tracker serves a whole traversal: [`CodeOffsets::reset`] rebinds it
/// at each method's Code attribute, [`CodeOffsets::advance`] follows each
/// instruction callback, and [`CodeOffsets::finish_method`] invalidates the
/// cursor between methods.
#[derive(Debug)]
pub struct CodeOffsets<'a> {
    bytes: &'a [u8],
    code_start: usize,
    code_len: usize,
    offset: usize,
    previous: usize,
    method: String,
    active: bool,
}

impl<'a> CodeOffsets<'a> {
    /// A tracker over one module's bytes, not yet bound to a method.
    pub fn new(bytes: &'a [u8]) -> Self {
        CodeOffsets {
            bytes,
            code_start: 0,
            code_len: 0,
            offset: 0,
            previous: 0,
            method: String::new(),
            active: false,
        }
    }

    /// Bind the tracker to the method whose Code attribute begins at
    /// `attribute_offset`, locating the instruction stream by walking the
    /// attribute's own length fields.
    pub fn reset(&mut self, method: &MethodKey, attribute_offset: usize) -> MergeResult<()> {
        self.method = method.to_string();
        // attribute layout: name index (2), length (4), max stack (2),
        // max locals (2), code length (4), then the instruction stream
        let attr_len = self.read_u32(attribute_offset + 2)? as usize;
        let code_len = self.read_u32(attribute_offset + 10)? as usize;
        if code_len + 12 > attr_len {
            return Err(self.desync(0, "code length exceeds attribute length"));
        }
        let code_start = attribute_offset + 14;
        if code_start + code_len > self.bytes.len() {
            return Err(self.desync(0, "instruction stream runs past end of module"));
        }
        self.code_start = code_start;
        self.code_len = code_len;
        self.offset = 0;
        self.previous = 0;
        self.active = true;
        Ok(())
    }

    /// Whether the tracker is bound to a method.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Offset of the next instruction to be visited.
    pub fn current_offset(&self) -> u32 {
        self.offset as u32
    }

    /// Offset of the instruction most recently completed. This is the
    /// offset instruction-site annotation records key on, because the
    /// format reports such an annotation after its owning instruction.
    pub fn previous_offset(&self) -> u32 {
        self.previous as u32
    }

    /// Invalidate the cursor at the end of a method.
    pub fn finish_method(&mut self) {
        self.active = false;
    }

    /// Advance past one visited instruction.
    pub fn advance(&mut self, insn: &Insn) -> MergeResult<()> {
        if !self.active {
            return Err(MergeError::order("instruction visited outside a method body"));
        }
        let size = self.measure(insn)?;
        if self.offset + size > self.code_len {
            return Err(self.desync(self.offset, "instruction runs past the code length"));
        }
        self.previous = self.offset;
        self.offset += size;
        Ok(())
    }

    fn measure(&self, insn: &Insn) -> MergeResult<usize> {
        match insn {
            Insn::Simple { opcode }
            | Insn::IntOperand { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::FieldAccess { opcode, .. } => self.table_size(*opcode),
            Insn::Invoke { opcode, .. } => self.table_size(*opcode),
            Insn::InvokeDynamic { .. } => Ok(5),
            Insn::MultiANewArray { .. } => Ok(4),
            // wide and narrow variants are distinct opcodes
            Insn::Jump { opcode, .. } => {
                if *opcode >= opcode::GOTO_W {
                    Ok(5)
                } else {
                    Ok(3)
                }
            }
            Insn::Ldc { .. } => match self.code_u8(self.offset)? {
                opcode::LDC => Ok(2),
                opcode::LDC_W | opcode::LDC2_W => Ok(3),
                other => Err(self.desync(
                    self.offset,
                    format!("expected a constant-pool load, found opcode {other:#04x}"),
                )),
            },
            Insn::Var { .. } => match self.code_u8(self.offset)? {
                opcode::WIDE => Ok(4),
                opcode::ILOAD..=opcode::ALOAD
                | opcode::ISTORE..=opcode::ASTORE
                | opcode::RET => Ok(2),
                opcode::ILOAD_0..=opcode::ALOAD_3
                | opcode::ISTORE_0..=opcode::ASTORE_3 => Ok(1),
                other => Err(self.desync(
                    self.offset,
                    format!("expected a local-variable instruction, found opcode {other:#04x}"),
                )),
            },
            Insn::Iinc { .. } => match self.code_u8(self.offset)? {
                opcode::WIDE => Ok(6),
                opcode::IINC => Ok(3),
                other => Err(self.desync(
                    self.offset,
                    format!("expected an increment instruction, found opcode {other:#04x}"),
                )),
            },
            Insn::TableSwitch { low, high, .. } => {
                let aligned = self.switch_payload(opcode::TABLESWITCH)?;
                let stream_low = self.code_i32(aligned + 4)?;
                let stream_high = self.code_i32(aligned + 8)?;
                if stream_low != *low || stream_high != *high {
                    return Err(self.desync(
                        self.offset,
                        format!(
                            "case range {stream_low}..={stream_high} in stream, \
                             {low}..={high} in callback"
                        ),
                    ));
                }
                let cases = (stream_high - stream_low + 1) as usize;
                Ok(aligned - self.offset + 12 + 4 * cases)
            }
            Insn::LookupSwitch { keys, .. } => {
                let aligned = self.switch_payload(opcode::LOOKUPSWITCH)?;
                let pairs = self.code_i32(aligned + 4)?;
                if pairs < 0 || pairs as usize != keys.len() {
                    return Err(self.desync(
                        self.offset,
                        format!("{pairs} case pairs in stream, {} in callback", keys.len()),
                    ));
                }
                Ok(aligned - self.offset + 8 + 8 * pairs as usize)
            }
        }
    }

    fn table_size(&self, op: u8) -> MergeResult<usize> {
        opcode::fixed_size(op)
            .ok_or_else(|| self.desync(self.offset, format!("opcode {op:#04x} has no fixed size")))
    }

    /// Check the opcode byte of a switch and return the 4-byte-aligned
    /// start of its payload, relative to the instruction stream.
    fn switch_payload(&self, expected: u8) -> MergeResult<usize> {
        let found = self.code_u8(self.offset)?;
        if found != expected {
            return Err(self.desync(
                self.offset,
                format!("expected opcode {expected:#04x}, found {found:#04x}"),
            ));
        }
        Ok((self.offset + 4) & !3)
    }

    fn code_u8(&self, rel: usize) -> MergeResult<u8> {
        if rel >= self.code_len {
            return Err(self.desync(rel, "read past the code length"));
        }
        Ok(self.bytes[self.code_start + rel])
    }

    fn code_i32(&self, rel: usize) -> MergeResult<i32> {
        if rel + 4 > self.code_len {
            return Err(self.desync(rel, "read past the code length"));
        }
        let b = &self.bytes[self.code_start + rel..];
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u32(&self, pos: usize) -> MergeResult<u32> {
        if pos + 4 > self.bytes.len() {
            return Err(self.desync(0, "attribute header runs past end of module"));
        }
        let b = &self.bytes[pos..];
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn desync(&self, offset: usize, detail: impl Into<String>) -> MergeError {
        MergeError::OffsetDesync {
            method: self.method.clone(),
            offset: offset as u32,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
