//! Code section layout.
//!
//! [`Code`] owns an ordered list of instructions and keeps
//! `address(i[k]) == base + size(i[0..k])` true as encodings change size.
//! A size change is propagated by a single forward walk from the instruction
//! after the one that changed; the walk stops at the first instruction that
//! has never been placed.

use std::io::Write;
use std::rc::Rc;

use crate::address::AddressConsumer;
use crate::error::LayoutError;
use crate::instruction::{Encode, Instruction};
use crate::size::{SizeChange, SizeProvider};

/// Upper bound on [`Code::relax`] passes before giving up.
pub const MAX_RELAXATION_PASSES: usize = 16;

#[derive(Debug)]
pub struct Code {
    instructions: Vec<Instruction>,
    base_address: u64,
    size: u64,
}

impl Code {
    /// Places every instruction sequentially from `base_address`, encoding each.
    pub fn new(instructions: Vec<Instruction>, base_address: u64) -> Self {
        let mut code = Self {
            instructions,
            base_address,
            size: 0,
        };
        code.linearize();
        code
    }

    fn linearize(&mut self) {
        let mut address = self.base_address;
        for (index, instruction) in self.instructions.iter_mut().enumerate() {
            instruction.set_address(address);
            let size = instruction.size();
            if instruction.bytes().is_none() {
                tracing::warn!("instruction {} ({}) cannot be encoded at 0x{:x}", index, instruction.mnemonic(), address);
            }
            address = address.wrapping_add(size);
        }
        self.size = address.wrapping_sub(self.base_address);
        tracing::debug!(
            "linearized {} instructions at 0x{:x}, size 0x{:x}",
            self.instructions.len(),
            self.base_address,
            self.size
        );
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.instructions.iter().position(|i| i.label_name() == Some(name))
    }

    pub fn label_address(&self, name: &str) -> Option<u64> {
        self.label_index(name).and_then(|index| self.instructions[index].address())
    }

    /// Lets an entity outside this section observe an instruction's address.
    pub fn add_address_consumer(&mut self, index: usize, consumer: Rc<dyn AddressConsumer>) {
        if let Some(instruction) = self.instructions.get_mut(index) {
            instruction.add_address_consumer(consumer);
        }
    }

    /// Propagates a size change of the instruction at `index`.
    ///
    /// Every placed instruction after `index` moves by the delta. Returns the
    /// change of the whole section so an enclosing layout can shift in turn.
    pub fn instruction_resized(&mut self, index: usize, change: SizeChange) -> SizeChange {
        let delta = change.delta();
        let previous = self.size;
        self.size = self.size.wrapping_add(delta);

        let mut shifted = 0;
        for instruction in self.instructions.iter_mut().skip(index + 1) {
            let Some(address) = instruction.address() else {
                break;
            };
            let moved = address.wrapping_add(delta);
            tracing::trace!("shift {} 0x{:x} -> 0x{:x}", instruction.mnemonic(), address, moved);
            instruction.set_address(moved);
            shifted += 1;
        }

        tracing::debug!(
            "instruction {} resized 0x{:x} -> 0x{:x}, shifted {} followers",
            index,
            change.previous,
            change.current,
            shifted
        );
        SizeChange::new(previous, self.size)
    }

    /// Re-encodes one instruction and propagates any size change.
    pub fn reencode(&mut self, index: usize) -> Option<SizeChange> {
        let change = self.instructions.get_mut(index)?.reencode()?;
        Some(self.instruction_resized(index, change))
    }

    /// Swaps in a new encoder for one instruction and propagates any size change.
    pub fn replace(&mut self, index: usize, encoder: Box<dyn Encode>) -> Option<SizeChange> {
        let change = self.instructions.get_mut(index)?.replace(encoder)?;
        Some(self.instruction_resized(index, change))
    }

    /// Moves the whole section, keeping relative layout.
    pub fn set_base_address(&mut self, base_address: u64) {
        let delta = base_address.wrapping_sub(self.base_address);
        self.base_address = base_address;
        for instruction in &mut self.instructions {
            let Some(address) = instruction.address() else {
                break;
            };
            instruction.set_address(address.wrapping_add(delta));
        }
    }

    /// Re-encodes address-dependent instructions until no size changes.
    ///
    /// Each size change is propagated with the usual forward walk. Returns the
    /// number of passes taken, including the final quiet one.
    pub fn relax(&mut self) -> Result<usize, LayoutError> {
        for pass in 1..=MAX_RELAXATION_PASSES {
            let mut changed = false;
            for index in 0..self.instructions.len() {
                if self.instructions[index].depends_on_address() && self.reencode(index).is_some() {
                    changed = true;
                }
            }
            if !changed {
                tracing::debug!("code settled after {} relaxation passes", pass);
                return Ok(pass);
            }
        }
        Err(LayoutError::RelaxationDiverged {
            passes: MAX_RELAXATION_PASSES,
        })
    }

    /// Addresses still to be patched, in sequence order.
    pub fn relocation_addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.instructions.iter().filter_map(Instruction::relocation_address)
    }

    /// Writes every instruction's bytes in order.
    pub fn write<W: Write>(&mut self, writer: &mut W) -> Result<(), LayoutError> {
        for (index, instruction) in self.instructions.iter_mut().enumerate() {
            instruction.write(index, writer)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn forget_address(&mut self, index: usize) {
        self.instructions[index].reset_address();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressWatch;
    use crate::instruction::RawBytes;
    use std::cell::Cell;

    /// Encoder whose length can be changed from outside.
    #[derive(Debug)]
    struct Resizable(Rc<Cell<usize>>);

    impl Encode for Resizable {
        fn mnemonic(&self) -> &str {
            "resizable"
        }

        fn encode(&self, _address: Option<u64>) -> Option<Vec<u8>> {
            Some(vec![0xcc; self.0.get()])
        }
    }

    /// A jump with a 2-byte short form and a 5-byte near form.
    #[derive(Debug)]
    struct Jump(Rc<AddressWatch>);

    impl Encode for Jump {
        fn mnemonic(&self) -> &str {
            "jmp"
        }

        fn encode(&self, address: Option<u64>) -> Option<Vec<u8>> {
            let short = match (address, self.0.get()) {
                (Some(from), Some(to)) => {
                    let disp = to.wrapping_sub(from.wrapping_add(2)) as i64;
                    i8::try_from(disp).ok()
                }
                _ => None,
            };
            match short {
                Some(disp) => Some(vec![0xeb, disp as u8]),
                None => Some(vec![0xe9, 0, 0, 0, 0]),
            }
        }

        fn depends_on_address(&self) -> bool {
            true
        }
    }

    fn raw(len: usize) -> Instruction {
        Instruction::new(RawBytes::new(vec![0x90; len]))
    }

    #[test]
    fn forward_shift_after_growth() {
        let first = Rc::new(Cell::new(2));
        let mut code = Code::new(
            vec![Instruction::new(Resizable(first.clone())), raw(3), raw(4)],
            100,
        );
        assert_eq!(code.size(), 9);

        first.set(5);
        let change = code.reencode(0);

        assert_eq!(change, Some(SizeChange::new(9, 12)));
        let addresses: Vec<_> = code.iter().map(|i| i.address()).collect();
        assert_eq!(addresses, vec![Some(100), Some(105), Some(108)]);
    }

    #[test]
    fn shrinking_moves_followers_back() {
        let middle = Rc::new(Cell::new(6));
        let mut code = Code::new(vec![raw(1), Instruction::new(Resizable(middle.clone())), raw(1)], 0x10);
        middle.set(2);
        code.reencode(1);
        assert_eq!(code.get(2).unwrap().address(), Some(0x13));
        assert_eq!(code.size(), 4);
    }

    #[test]
    fn shift_stops_at_unplaced_instruction() {
        let first = Rc::new(Cell::new(1));
        let mut code = Code::new(
            vec![Instruction::new(Resizable(first.clone())), raw(1), raw(1), raw(1)],
            0,
        );
        code.forget_address(2);

        first.set(3);
        code.reencode(0);

        assert_eq!(code.get(1).unwrap().address(), Some(3));
        assert_eq!(code.get(2).unwrap().address(), None);
        assert_eq!(code.get(3).unwrap().address(), Some(3));
    }

    #[test]
    fn unchanged_size_does_not_propagate() {
        let mut code = Code::new(vec![raw(2), raw(2)], 0);
        assert_eq!(code.reencode(0), None);
        assert_eq!(code.reencode(9), None);
    }

    #[test]
    fn labels_do_not_change_size() {
        let mut code = Code::new(
            vec![Instruction::label("a"), raw(3), Instruction::label("b"), raw(2), Instruction::label("c")],
            0x400,
        );
        assert_eq!(code.size(), 5);
        assert_eq!(code.label_address("a"), Some(0x400));
        assert_eq!(code.label_address("b"), Some(0x403));
        assert_eq!(code.label_address("c"), Some(0x405));
        assert_eq!(code.label_address("missing"), None);

        let mut out = Vec::new();
        code.write(&mut out).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn relax_shrinks_forward_jump() {
        let target = AddressWatch::new();
        let mut label = Instruction::label("done");
        label.add_address_consumer(target.clone());

        let mut code = Code::new(vec![Instruction::new(Jump(target.clone())), raw(4), label], 0x1000);
        // Target was unknown while the jump was first encoded.
        assert_eq!(code.size(), 9);
        assert_eq!(target.get(), Some(0x1009));

        let passes = code.relax().unwrap();
        assert_eq!(passes, 2);
        assert_eq!(code.size(), 6);
        assert_eq!(target.get(), Some(0x1006));

        let mut out = Vec::new();
        code.write(&mut out).unwrap();
        assert_eq!(&out[..2], &[0xeb, 0x04]);
    }

    #[test]
    fn relax_gives_up_on_oscillation() {
        /// Flips between two sizes on every encode.
        #[derive(Debug)]
        struct Flapping(Cell<bool>);

        impl Encode for Flapping {
            fn mnemonic(&self) -> &str {
                "flap"
            }

            fn encode(&self, _address: Option<u64>) -> Option<Vec<u8>> {
                let long = !self.0.get();
                self.0.set(long);
                Some(vec![0; if long { 4 } else { 1 }])
            }

            fn depends_on_address(&self) -> bool {
                true
            }
        }

        let mut code = Code::new(vec![Instruction::new(Flapping(Cell::new(false)))], 0);
        let err = code.relax().unwrap_err();
        assert!(matches!(err, LayoutError::RelaxationDiverged { passes: MAX_RELAXATION_PASSES }));
    }

    #[test]
    fn rebasing_moves_everything() {
        let mut code = Code::new(vec![raw(2), Instruction::label("x"), raw(2)], 0x100);
        code.set_base_address(0x2000);
        assert_eq!(code.label_address("x"), Some(0x2002));
        assert_eq!(code.get(2).unwrap().address(), Some(0x2002));
        assert_eq!(code.size(), 4);
    }

    #[test]
    fn relocations_follow_shifts() {
        let first = Rc::new(Cell::new(1));
        let mut code = Code::new(
            vec![
                Instruction::new(Resizable(first.clone())),
                Instruction::new(RawBytes::new(vec![0x48, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0]).with_relocation(2)),
            ],
            0,
        );
        assert_eq!(code.relocation_addresses().collect::<Vec<_>>(), vec![3]);

        first.set(4);
        code.reencode(0);
        assert_eq!(code.relocation_addresses().collect::<Vec<_>>(), vec![6]);
    }
}
