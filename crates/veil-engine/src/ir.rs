//! Accessor instruction IR
//!
//! Synthesized method bodies are short, branch-free instruction sequences:
//! load the bound instance and/or arguments, touch exactly one target
//! member (directly or through a handle), and return. [`IrBuilder`]
//! tracks stack effects as instructions are emitted, so malformed bodies
//! are caught at [`IrBuilder::build`] time and re-audited on load (see
//! [`audit`]). There are deliberately no jump instructions; every body is
//! linear and total.

use std::sync::Arc;

use veil_runtime::{TypeDef, TypeSig, Value};

use crate::descriptor::{FieldRef, MethodRef};
use crate::{EngineError, EngineResult};

/// One accessor instruction
#[derive(Debug, Clone)]
pub enum Inst {
    /// Push the accessor's bound instance
    LoadBoundInstance,
    /// Push argument `i`
    LoadArg(usize),
    /// Push a constant
    LoadConst(Value),
    /// Read a field; pops the receiver for instance fields
    ReadField(FieldRef),
    /// Write a field; pops value (and receiver for instance fields)
    WriteField(FieldRef),
    /// Call a method directly; pops its arguments (and receiver if
    /// non-static), pushes the result
    CallMethod(MethodRef),
    /// Invoke a bound handle by index; pops `argc` arguments (and a
    /// receiver when `with_receiver`), pushes the result
    CallHandle {
        /// Index into the accessor's handle list
        handle: usize,
        /// Argument count
        argc: usize,
        /// Whether a receiver is on the stack below the arguments
        with_receiver: bool,
    },
    /// Call a constructor; pops its arguments, pushes the new instance
    Construct {
        /// Declaring type
        owner: Arc<TypeDef>,
        /// Index into `owner.ctors`
        ctor: usize,
    },
    /// Discard the top of stack
    Pop,
    /// Return the top of stack
    Return,
    /// Return no value
    ReturnVoid,
    /// Unconditionally raise a runtime error
    Raise(String),
}

/// A finished method body
#[derive(Debug, Clone)]
pub struct MethodImage {
    /// Method name, matching the contract method it implements
    pub name: Arc<str>,
    /// Parameter signatures
    pub params: Vec<TypeSig>,
    /// Return signature
    pub ret: TypeSig,
    /// Instruction sequence
    pub insts: Vec<Inst>,
    /// Maximum operand-stack depth
    pub max_stack: usize,
}

/// Result of validating a body under construction
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Whether validation passed
    pub is_valid: bool,
    /// Accumulated errors
    pub errors: Vec<String>,
}

/// Stack effect of one instruction: (pops, pushes, is_terminal)
fn effect(inst: &Inst, param_count: usize) -> Result<(usize, usize, bool), String> {
    match inst {
        Inst::LoadBoundInstance | Inst::LoadConst(_) => Ok((0, 1, false)),
        Inst::LoadArg(i) => {
            if *i >= param_count {
                Err(format!("argument index {} out of range", i))
            } else {
                Ok((0, 1, false))
            }
        }
        Inst::ReadField(f) => {
            if f.def().access.is_static() {
                Ok((0, 1, false))
            } else {
                Ok((1, 1, false))
            }
        }
        Inst::WriteField(f) => {
            if f.def().access.is_static() {
                Ok((1, 0, false))
            } else {
                Ok((2, 0, false))
            }
        }
        Inst::CallMethod(m) => {
            let def = m.def();
            let pops = def.params.len() + usize::from(!def.access.is_static());
            Ok((pops, 1, false))
        }
        Inst::CallHandle {
            argc,
            with_receiver,
            ..
        } => Ok((argc + usize::from(*with_receiver), 1, false)),
        Inst::Construct { owner, ctor } => match owner.ctors.get(*ctor) {
            Some(c) => Ok((c.params.len(), 1, false)),
            None => Err(format!("constructor #{} missing on `{}`", ctor, owner.name)),
        },
        Inst::Pop => Ok((1, 0, false)),
        Inst::Return => Ok((1, 0, true)),
        Inst::ReturnVoid => Ok((0, 0, true)),
        Inst::Raise(_) => Ok((0, 0, true)),
    }
}

/// Re-audit a finished body: the loader's minimal on-load validation.
/// Simulates stack effects, checks argument ranges, and requires exactly
/// one terminal instruction in final position with a balanced stack.
pub fn audit(image: &MethodImage) -> Result<(), String> {
    let mut depth = 0usize;
    for (pos, inst) in image.insts.iter().enumerate() {
        let (pops, pushes, terminal) = effect(inst, image.params.len())?;
        if pops > depth {
            return Err(format!("stack underflow at instruction {}", pos));
        }
        depth = depth - pops + pushes;
        if terminal {
            if pos + 1 != image.insts.len() {
                return Err(format!("instruction after terminal at {}", pos));
            }
            let balanced = match inst {
                Inst::Raise(_) => true,
                _ => depth == 0,
            };
            if !balanced {
                return Err(format!("stack not empty at terminal ({} left)", depth));
            }
            return Ok(());
        }
        if depth > image.max_stack {
            return Err(format!(
                "stack depth {} exceeds declared max {}",
                depth, image.max_stack
            ));
        }
    }
    Err("missing terminal instruction".to_string())
}

/// Builder for one method body
#[derive(Debug)]
pub struct IrBuilder {
    name: String,
    params: Vec<TypeSig>,
    ret: TypeSig,
    insts: Vec<Inst>,
    depth: usize,
    max_stack: usize,
    terminated: bool,
    finalized: bool,
    errors: Vec<String>,
}

impl IrBuilder {
    /// Builder for a method with the given identity.
    pub fn new(name: &str, params: Vec<TypeSig>, ret: TypeSig) -> Self {
        Self {
            name: name.to_string(),
            params,
            ret,
            insts: Vec::with_capacity(8),
            depth: 0,
            max_stack: 0,
            terminated: false,
            finalized: false,
            errors: Vec::new(),
        }
    }

    fn emit(&mut self, inst: Inst) -> EngineResult<()> {
        if self.finalized {
            return Err(EngineError::InvalidState(
                "cannot modify finalized IrBuilder".to_string(),
            ));
        }
        if self.terminated {
            self.errors
                .push(format!("instruction after terminal: {:?}", inst));
        }
        match effect(&inst, self.params.len()) {
            Ok((pops, pushes, terminal)) => {
                if pops > self.depth {
                    self.errors
                        .push(format!("stack underflow emitting {:?}", inst));
                    self.depth = 0;
                } else {
                    self.depth -= pops;
                }
                self.depth += pushes;
                if self.depth > self.max_stack {
                    self.max_stack = self.depth;
                }
                if terminal {
                    let balanced = matches!(inst, Inst::Raise(_)) || self.depth == 0;
                    if !balanced {
                        self.errors
                            .push(format!("stack not empty at terminal ({} left)", self.depth));
                    }
                    self.terminated = true;
                }
            }
            Err(e) => self.errors.push(e),
        }
        self.insts.push(inst);
        Ok(())
    }

    /// Push the bound instance.
    pub fn emit_load_bound_instance(&mut self) -> EngineResult<()> {
        self.emit(Inst::LoadBoundInstance)
    }

    /// Push argument `index`.
    pub fn emit_load_arg(&mut self, index: usize) -> EngineResult<()> {
        self.emit(Inst::LoadArg(index))
    }

    /// Push a constant.
    pub fn emit_load_const(&mut self, value: Value) -> EngineResult<()> {
        self.emit(Inst::LoadConst(value))
    }

    /// Read a field.
    pub fn emit_read_field(&mut self, field: FieldRef) -> EngineResult<()> {
        self.emit(Inst::ReadField(field))
    }

    /// Write a field.
    pub fn emit_write_field(&mut self, field: FieldRef) -> EngineResult<()> {
        self.emit(Inst::WriteField(field))
    }

    /// Call a method directly.
    pub fn emit_call_method(&mut self, method: MethodRef) -> EngineResult<()> {
        self.emit(Inst::CallMethod(method))
    }

    /// Invoke a bound handle.
    pub fn emit_call_handle(
        &mut self,
        handle: usize,
        argc: usize,
        with_receiver: bool,
    ) -> EngineResult<()> {
        self.emit(Inst::CallHandle {
            handle,
            argc,
            with_receiver,
        })
    }

    /// Call a constructor.
    pub fn emit_construct(&mut self, owner: Arc<TypeDef>, ctor: usize) -> EngineResult<()> {
        self.emit(Inst::Construct { owner, ctor })
    }

    /// Discard the top of stack.
    pub fn emit_pop(&mut self) -> EngineResult<()> {
        self.emit(Inst::Pop)
    }

    /// Return the top of stack.
    pub fn emit_return(&mut self) -> EngineResult<()> {
        self.emit(Inst::Return)
    }

    /// Return no value.
    pub fn emit_return_void(&mut self) -> EngineResult<()> {
        self.emit(Inst::ReturnVoid)
    }

    /// Unconditionally raise with `message`.
    pub fn emit_raise(&mut self, message: &str) -> EngineResult<()> {
        self.emit(Inst::Raise(message.to_string()))
    }

    /// Validate the body as emitted so far.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = self.errors.clone();
        if !self.terminated {
            errors.push("missing terminal instruction".to_string());
        }
        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Finalize into a [`MethodImage`]; fails if validation does.
    pub fn build(&mut self) -> EngineResult<MethodImage> {
        if self.finalized {
            return Err(EngineError::InvalidState(
                "IrBuilder already finalized".to_string(),
            ));
        }
        let report = self.validate();
        if !report.is_valid {
            return Err(EngineError::Malformed(format!(
                "body of `{}`: {}",
                self.name,
                report.errors.join("; ")
            )));
        }
        self.finalized = true;
        Ok(MethodImage {
            name: Arc::from(self.name.as_str()),
            params: self.params.clone(),
            ret: self.ret.clone(),
            insts: self.insts.clone(),
            max_stack: self.max_stack,
        })
    }
}
