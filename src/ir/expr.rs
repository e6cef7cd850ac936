//! Expression tree for equation right-hand sides, guards, and delays.
//!
//! Expressions arrive from the front end fully resolved except for variable
//! references, which are plain names (optionally qualified by a connection
//! binding) and are bound to concrete storage during analysis.

use serde::{Deserialize, Serialize};

/// A reference to a variable, either in the owning component or reached
/// through one of its connection bindings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarRef {
    /// Connection binding name, when the variable lives in a bound component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
    /// Variable name within the target component.
    pub name: String,
}

impl VarRef {
    pub fn local(name: &str) -> Self {
        Self {
            binding: None,
            name: name.to_string(),
        }
    }

    pub fn bound(binding: &str, name: &str) -> Self {
        Self {
            binding: Some(binding.to_string()),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for VarRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.binding {
            Some(b) => write!(f, "{}.{}", b, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    /// Comparison and logical operators produce a boolean, not a scaled value.
    pub fn is_boolean(&self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Library functions lowered through the numeric strategy. In fixed-point
/// mode these become runtime helper calls that take explicit exponents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Func {
    Exp,
    Log,
    Pow,
    Sqrt,
    Sin,
    Cos,
    Atan,
    Norm,
    Min,
    Max,
    Abs,
}

impl Func {
    pub fn float_name(&self) -> &'static str {
        match self {
            Func::Exp => "std::exp",
            Func::Log => "std::log",
            Func::Pow => "std::pow",
            Func::Sqrt => "std::sqrt",
            Func::Sin => "std::sin",
            Func::Cos => "std::cos",
            Func::Atan => "std::atan",
            Func::Norm => "std::hypot",
            Func::Min => "std::min",
            Func::Max => "std::max",
            Func::Abs => "std::fabs",
        }
    }

    pub fn fixed_name(&self) -> &'static str {
        match self {
            Func::Exp => "fx_exp",
            Func::Log => "fx_log",
            Func::Pow => "fx_pow",
            Func::Sqrt => "fx_sqrt",
            Func::Sin => "fx_sin",
            Func::Cos => "fx_cos",
            Func::Atan => "fx_atan",
            Func::Norm => "fx_norm",
            Func::Min => "fx_min",
            Func::Max => "fx_max",
            Func::Abs => "fx_abs",
        }
    }

    /// Min, max and abs stay in plain integer arithmetic; only genuinely
    /// transcendental functions need exponent-aware runtime helpers.
    pub fn is_transcendental(&self) -> bool {
        !matches!(self, Func::Min | Func::Max | Func::Abs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expr {
    Const(f64),
    Var(VarRef),
    Unary {
        op: UnOp,
        rhs: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Var(VarRef::local(name))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// True when the expression is a literal constant (possibly negated).
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(v) => Some(*v),
            Expr::Unary {
                op: UnOp::Neg,
                rhs,
            } => rhs.as_const().map(|v| -v),
            _ => None,
        }
    }

    /// Collect every variable reference in the expression, in left-to-right
    /// order.
    pub fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a VarRef>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(r) => refs.push(r),
            Expr::Unary { rhs, .. } => rhs.collect_refs(refs),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_refs(refs);
                rhs.collect_refs(refs);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_refs(refs);
                }
            }
        }
    }

    pub fn refs(&self) -> Vec<&VarRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }
}
