//! Structural well-formedness checks for a module.
//!
//! The pass never consumes these results itself; tests and embedders
//! run the verifier to catch malformed IR early.

use thiserror::Error;

use super::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("function {func}: block {block} has no terminator")]
    MissingTerminator { func: String, block: BlockId },

    #[error("function {func}: block {block} contains terminator {inst} in its body")]
    TerminatorInBody {
        func: String,
        block: BlockId,
        inst: InstId,
    },

    #[error("function {func}: instruction {inst} is detached but still listed in {block}")]
    DetachedInBlock {
        func: String,
        block: BlockId,
        inst: InstId,
    },

    #[error("function {func}: branch in {block} targets unknown block {target}")]
    BadBranchTarget {
        func: String,
        block: BlockId,
        target: BlockId,
    },

    #[error("function {func}: instruction {inst} records the wrong parent block")]
    WrongParentBlock { func: String, inst: InstId },
}

/// Check every live function with a body
pub fn verify_module(m: &Module) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();
    for func in &m.funcs {
        if func.deleted || func.is_declaration {
            continue;
        }
        verify_function(func, &mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn verify_function(func: &Function, errors: &mut Vec<VerifyError>) {
    let block_count = func.blocks.len() as u32;
    for block in &func.blocks {
        match block.term {
            None => errors.push(VerifyError::MissingTerminator {
                func: func.name.clone(),
                block: block.id,
            }),
            Some(t) => {
                for target in block.successors(func) {
                    if target.0 >= block_count {
                        errors.push(VerifyError::BadBranchTarget {
                            func: func.name.clone(),
                            block: block.id,
                            target,
                        });
                    }
                }
                if func.inst(t).block != block.id {
                    errors.push(VerifyError::WrongParentBlock {
                        func: func.name.clone(),
                        inst: t,
                    });
                }
            }
        }
        for &i in &block.insts {
            let data = func.inst(i);
            if data.kind.is_terminator() {
                errors.push(VerifyError::TerminatorInBody {
                    func: func.name.clone(),
                    block: block.id,
                    inst: i,
                });
            }
            if data.detached {
                errors.push(VerifyError::DetachedInBlock {
                    func: func.name.clone(),
                    block: block.id,
                    inst: i,
                });
            }
            if data.block != block.id {
                errors.push(VerifyError::WrongParentBlock {
                    func: func.name.clone(),
                    inst: i,
                });
            }
        }
    }
}
