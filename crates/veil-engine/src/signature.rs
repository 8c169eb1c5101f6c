//! Canonical signature rendering
//!
//! A pure builder: accumulate parameter signatures and a return signature
//! (defaulting to void), then [`SignatureBuilder::build`] the immutable
//! [`Signature`]. The rendered form appears in resolution errors, loader
//! diagnostics, and synthesized-method identity; the builder carries no
//! state beyond its two accumulators and is safe to discard after use.

use std::fmt;

use veil_runtime::TypeSig;

/// An accepted-parameter/return signature pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Parameter signatures, in declaration order
    pub params: Vec<TypeSig>,
    /// Return signature
    pub ret: TypeSig,
}

impl Signature {
    /// Canonical form: every component canonicalized.
    pub fn canonical(&self) -> Signature {
        Signature {
            params: self.params.iter().map(TypeSig::canonical).collect(),
            ret: self.ret.canonical(),
        }
    }

    /// Render as `(a, b) -> r`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Builder for a [`Signature`]
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    params: Vec<TypeSig>,
    ret: TypeSig,
}

impl SignatureBuilder {
    /// Empty signature returning void.
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            ret: TypeSig::Void,
        }
    }

    /// Append an accepted parameter signature.
    pub fn accept(mut self, sig: TypeSig) -> Self {
        self.params.push(sig);
        self
    }

    /// Append every signature in `sigs`.
    pub fn accept_all(mut self, sigs: &[TypeSig]) -> Self {
        self.params.extend(sigs.iter().cloned());
        self
    }

    /// Set the return signature.
    pub fn returns(mut self, sig: TypeSig) -> Self {
        self.ret = sig;
        self
    }

    /// Finish the signature.
    pub fn build(self) -> Signature {
        Signature {
            params: self.params,
            ret: self.ret,
        }
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}
