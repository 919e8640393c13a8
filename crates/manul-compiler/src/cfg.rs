//! Basic blocks and the per-unit block arena.
//!
//! Block graphs are shared, not tree-shaped: the same block may be the
//! successor of many predecessors (the statement after an if/else, a loop
//! header) and cycles occur. Blocks therefore live in a [`BlockArena`] and
//! reference each other by [`BlockId`]; identity is index equality, never
//! structural comparison.
//!
//! Construction discipline: a block is built by prepending one instruction
//! to an already complete block ([`BlockArena::prepend`]), so every block
//! is complete by construction before it is exposed. The one exception is
//! the loop pivot created by [`BlockArena::placeholder`], whose exit is
//! patched exactly once ([`BlockArena::set_exit`]) before the graph leaves
//! the translation that created it.

use crate::bytecode::{Branch, Bytecode};

/// Identifies a block within one unit's [`BlockArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    /// The arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    /// Unconditional transfer to the successor.
    Fall(BlockId),
    /// Branching comparison with its two successors.
    Branch {
        test: Branch,
        yes: BlockId,
        no: BlockId,
    },
    /// The block ends in a terminal instruction (its last list element).
    End,
}

/// An ordered instruction sequence plus its exit.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    instrs: Vec<Bytecode>,
    exit: Exit,
}

impl Block {
    /// The sequential (and, for [`Exit::End`], terminal) instructions.
    pub fn instrs(&self) -> &[Bytecode] {
        &self.instrs
    }

    /// How control leaves this block.
    pub fn exit(&self) -> &Exit {
        &self.exit
    }
}

/// Owns the blocks of one compiled unit's control-flow graph.
///
/// Blocks are created during translation of one unit and discarded once
/// the code generator has consumed the unit's graph.
#[derive(Debug, Default)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of blocks allocated.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Access a block.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// All block ids, in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    fn push(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    /// An instruction-free passthrough block falling into `successor`.
    ///
    /// Used as the initial continuation handed into translation of a
    /// unit's entry.
    pub fn passthrough(&mut self, successor: BlockId) -> BlockId {
        self.push(Block {
            instrs: Vec::new(),
            exit: Exit::Fall(successor),
        })
    }

    /// A block consisting of a single terminal instruction.
    ///
    /// # Panics
    ///
    /// Panics if `last` is not terminal; that would leave a block with
    /// neither successor nor terminator, which must not exist.
    pub fn terminal(&mut self, last: Bytecode) -> BlockId {
        assert!(last.is_terminal(), "terminal block needs a terminal instruction");
        self.push(Block {
            instrs: vec![last],
            exit: Exit::End,
        })
    }

    /// The block that executes `instr` and then proceeds to `successor`.
    ///
    /// Pure with respect to `successor`: the successor block is never
    /// mutated, so it can be shared by any number of predecessors.
    ///
    /// # Panics
    ///
    /// Panics if `instr` is terminal; terminal instructions form blocks via
    /// [`BlockArena::terminal`].
    pub fn prepend(&mut self, instr: Bytecode, successor: BlockId) -> BlockId {
        assert!(
            !instr.is_terminal(),
            "terminal instructions cannot have a successor"
        );
        self.push(Block {
            instrs: vec![instr],
            exit: Exit::Fall(successor),
        })
    }

    /// An instruction-free block routing control through a branching
    /// comparison. Operand values reach it on the stack.
    pub fn branch(&mut self, test: Branch, yes: BlockId, no: BlockId) -> BlockId {
        self.push(Block {
            instrs: Vec::new(),
            exit: Exit::Branch { test, yes, no },
        })
    }

    /// An empty block whose exit is patched later via
    /// [`BlockArena::set_exit`]; the loop pivot.
    ///
    /// Until patched it reads as [`Exit::End`] with no terminal
    /// instruction, which the code generator rejects as an internal
    /// invariant violation, so an unpatched placeholder cannot silently
    /// produce code.
    pub fn placeholder(&mut self) -> BlockId {
        self.push(Block {
            instrs: Vec::new(),
            exit: Exit::End,
        })
    }

    /// Patch a placeholder's exit. Happens at most once per block, before
    /// the graph is exposed outside translation.
    pub fn set_exit(&mut self, id: BlockId, exit: Exit) {
        self.blocks[id.index()].exit = exit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CompareKind;
    use manul_core::Type;

    #[test]
    fn prepend_is_pure() {
        let mut arena = BlockArena::new();
        let end = arena.terminal(Bytecode::Return(Type::Void));
        let a = arena.prepend(Bytecode::Const(1), end);
        let b = arena.prepend(Bytecode::Const(2), end);

        // Two predecessors share the same successor object.
        assert_eq!(arena.block(a).exit(), &Exit::Fall(end));
        assert_eq!(arena.block(b).exit(), &Exit::Fall(end));
        assert_eq!(arena.block(end).instrs().len(), 1);
    }

    #[test]
    fn identity_is_by_id_not_structure() {
        let mut arena = BlockArena::new();
        let a = arena.terminal(Bytecode::Return(Type::Void));
        let b = arena.terminal(Bytecode::Return(Type::Void));
        assert_ne!(a, b);
        assert_eq!(arena.block(a), arena.block(b));
    }

    #[test]
    fn placeholder_closes_a_cycle() {
        let mut arena = BlockArena::new();
        let end = arena.terminal(Bytecode::Return(Type::Void));
        let pivot = arena.placeholder();
        // Loop body falls back into the pivot.
        let body = arena.prepend(Bytecode::Pop, pivot);
        let test = arena.branch(
            Branch::If {
                kind: CompareKind::Ne,
            },
            body,
            end,
        );
        arena.set_exit(pivot, Exit::Fall(test));

        match arena.block(pivot).exit() {
            Exit::Fall(target) => assert_eq!(*target, test),
            other => panic!("unexpected exit {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "terminal instructions cannot have a successor")]
    fn prepending_a_terminal_panics() {
        let mut arena = BlockArena::new();
        let end = arena.terminal(Bytecode::Return(Type::Void));
        arena.prepend(Bytecode::Return(Type::Int), end);
    }
}
