//! Synthesized types and live accessors
//!
//! A [`TypeImage`] is the fully-formed blob the generation engine hands to
//! the loader: method bodies plus the constructor shape (whether a bound
//! instance is required, how many handles are attached). The loader turns
//! it into a [`SynthesizedType`], which is instantiated exactly once per
//! (target, contract) pair into an [`Accessor`] carrying the live bound
//! state. Method bodies run on a bounded stack machine; bodies are
//! branch-free, so evaluation is linear.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use veil_runtime::{MethodBody, RuntimeError, TypeDef, Value};

use crate::descriptor::{read_field, write_field};
use crate::handles::MemberHandle;
use crate::ir::{audit, Inst, MethodImage};
use crate::{EngineError, EngineResult};

/// A fully-formed synthesized type ready for definition
#[derive(Debug, Clone)]
pub struct TypeImage {
    /// Synthesized type name, unique per generation
    pub name: String,
    /// The contract interface this type implements
    pub contract: Arc<TypeDef>,
    /// The target type it accesses
    pub target: Arc<TypeDef>,
    /// One body per contract method, in declaration order
    pub methods: Vec<MethodImage>,
    /// Whether any body loads the bound instance
    pub needs_instance: bool,
    /// Number of bound handles the constructor takes
    pub handle_count: usize,
}

/// A defined synthesized type
#[derive(Debug)]
pub struct SynthesizedType {
    name: Arc<str>,
    contract: Arc<TypeDef>,
    target: Arc<TypeDef>,
    methods: Vec<MethodImage>,
    by_name: FxHashMap<Arc<str>, usize>,
    needs_instance: bool,
    handle_count: usize,
}

impl SynthesizedType {
    /// Validate an image and seal it into a type. Every body is re-audited
    /// here; a failure indicates a generator bug, not user error.
    pub(crate) fn from_image(image: TypeImage) -> EngineResult<Self> {
        let mut by_name = FxHashMap::default();
        for (index, method) in image.methods.iter().enumerate() {
            audit(method).map_err(|e| {
                EngineError::Malformed(format!("method `{}` of `{}`: {}", method.name, image.name, e))
            })?;
            if by_name.insert(method.name.clone(), index).is_some() {
                return Err(EngineError::Malformed(format!(
                    "duplicate method `{}` in `{}`",
                    method.name, image.name
                )));
            }
        }
        Ok(Self {
            name: Arc::from(image.name.as_str()),
            contract: image.contract,
            target: image.target,
            methods: image.methods,
            by_name,
            needs_instance: image.needs_instance,
            handle_count: image.handle_count,
        })
    }

    /// The synthesized type's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The implemented contract.
    pub fn contract(&self) -> &Arc<TypeDef> {
        &self.contract
    }

    /// The accessed target type.
    pub fn target(&self) -> &Arc<TypeDef> {
        &self.target
    }

    /// Whether instantiation requires a bound instance.
    pub fn needs_instance(&self) -> bool {
        self.needs_instance
    }

    /// Number of bound handles instantiation requires.
    pub fn handle_count(&self) -> usize {
        self.handle_count
    }

    /// Names of the synthesized methods.
    pub fn method_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.methods.iter().map(|m| &*m.name)
    }

    /// Instantiate with the live constructor arguments: the bound instance
    /// (iff required) and exactly the declared number of handles, in that
    /// fixed order.
    pub fn instantiate(
        self: &Arc<Self>,
        bound: Option<Value>,
        handles: Vec<MemberHandle>,
    ) -> EngineResult<Accessor> {
        if self.needs_instance && bound.is_none() {
            return Err(EngineError::MissingInstance(self.target.name.to_string()));
        }
        if !self.needs_instance && bound.is_some() {
            return Err(EngineError::InvalidState(format!(
                "`{}` takes no bound instance",
                self.name
            )));
        }
        if handles.len() != self.handle_count {
            return Err(EngineError::InvalidState(format!(
                "`{}` takes {} handles, got {}",
                self.name,
                self.handle_count,
                handles.len()
            )));
        }
        Ok(Accessor {
            ty: self.clone(),
            bound,
            handles,
        })
    }
}

/// A live instance of a synthesized type
pub struct Accessor {
    ty: Arc<SynthesizedType>,
    bound: Option<Value>,
    handles: Vec<MemberHandle>,
}

impl Accessor {
    /// The defining synthesized type.
    pub fn synthesized(&self) -> &Arc<SynthesizedType> {
        &self.ty
    }

    /// The implemented contract.
    pub fn contract(&self) -> &Arc<TypeDef> {
        self.ty.contract()
    }

    /// Call a contract method by name.
    pub fn call(&self, method: &str, args: &[Value]) -> EngineResult<Value> {
        let index = *self.ty.by_name.get(method).ok_or_else(|| {
            EngineError::MemberNotFound(format!("`{}` on `{}`", method, self.ty.name))
        })?;
        let image = &self.ty.methods[index];
        if args.len() != image.params.len() {
            return Err(RuntimeError::ArityMismatch {
                expected: image.params.len(),
                actual: args.len(),
            }
            .into());
        }
        self.eval(image, args)
    }

    fn eval(&self, image: &MethodImage, args: &[Value]) -> EngineResult<Value> {
        let mut stack: Vec<Value> = Vec::with_capacity(image.max_stack);
        for inst in &image.insts {
            match inst {
                Inst::LoadBoundInstance => {
                    let bound = self.bound.clone().ok_or_else(|| {
                        EngineError::InvalidState(format!(
                            "`{}` has no bound instance",
                            self.ty.name
                        ))
                    })?;
                    stack.push(bound);
                }
                Inst::LoadArg(i) => stack.push(args[*i].clone()),
                Inst::LoadConst(v) => stack.push(v.clone()),
                Inst::ReadField(f) => {
                    let recv = if f.def().access.is_static() {
                        None
                    } else {
                        stack.pop()
                    };
                    stack.push(read_field(f, recv.as_ref())?);
                }
                Inst::WriteField(f) => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    let recv = if f.def().access.is_static() {
                        None
                    } else {
                        stack.pop()
                    };
                    write_field(f, recv.as_ref(), value)?;
                }
                Inst::CallMethod(m) => {
                    let def = m.def();
                    let call_args = split_args(&mut stack, def.params.len())?;
                    let recv = if def.access.is_static() {
                        None
                    } else {
                        Some(stack.pop().ok_or_else(underflow)?)
                    };
                    let body = match &def.body {
                        MethodBody::Native(f) => f.clone(),
                        MethodBody::Abstract => {
                            return Err(EngineError::InvalidState(format!(
                                "{} is abstract",
                                m.describe()
                            )));
                        }
                    };
                    stack.push(body(recv.as_ref(), &call_args)?);
                }
                Inst::CallHandle {
                    handle,
                    argc,
                    with_receiver,
                } => {
                    let call_args = split_args(&mut stack, *argc)?;
                    let recv = if *with_receiver {
                        Some(stack.pop().ok_or_else(underflow)?)
                    } else {
                        None
                    };
                    let result = self.handles[*handle].invoke(recv.as_ref(), &call_args)?;
                    stack.push(result);
                }
                Inst::Construct { owner, ctor } => {
                    let call_args = split_args(&mut stack, owner.ctors[*ctor].params.len())?;
                    stack.push(owner.construct(*ctor, &call_args)?);
                }
                Inst::Pop => {
                    stack.pop().ok_or_else(underflow)?;
                }
                Inst::Return => {
                    return stack.pop().ok_or_else(underflow);
                }
                Inst::ReturnVoid => return Ok(Value::Null),
                Inst::Raise(message) => {
                    return Err(EngineError::Runtime(message.clone()));
                }
            }
        }
        Err(EngineError::Malformed(format!(
            "body of `{}` fell off the end",
            image.name
        )))
    }
}

fn underflow() -> EngineError {
    EngineError::Malformed("operand stack underflow".to_string())
}

fn split_args(stack: &mut Vec<Value>, argc: usize) -> EngineResult<Vec<Value>> {
    if stack.len() < argc {
        return Err(underflow());
    }
    Ok(stack.split_off(stack.len() - argc))
}
