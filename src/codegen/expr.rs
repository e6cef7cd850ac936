//! Expression rendering through a numeric strategy.
//!
//! Exponent discipline (fixed point): every sub-expression has a natural
//! exponent derived from its operands; the renderer produces each operand at
//! its natural exponent, applies the raw operation, and aligns the result to
//! the exponent the context wants. Floating point degenerates to exponent 0
//! everywhere and alignment is the identity.

use crate::analysis::special::{VAR_INDEX, VAR_LIVE};
use crate::ir::ast::CompId;
use crate::ir::error::ErrorLog;
use crate::ir::expr::{BinOp, Expr, UnOp, VarRef};
use crate::ir::resolve::resolve_ref_checked;

use super::names::{field_name, pop_field_name};
use super::numeric::NumericStrategy;

/// Where variable references live relative to the method being emitted.
pub struct ExprScope<'a> {
    pub arena: &'a crate::ir::ast::ModelArena,
    pub comp: CompId,
    /// Prefix for per-instance fields ("" inside Part methods, "p." inside
    /// population loops).
    pub part_recv: &'a str,
    /// Prefix for population-level fields ("pop." inside Part methods, ""
    /// inside Pop methods).
    pub pop_recv: &'a str,
    /// Exponent of the time parameters `t` and `dt`.
    pub time_exp: i32,
}

impl<'a> ExprScope<'a> {
    /// Render a reference as a C++ lvalue, with its exponent.
    fn render_ref(&self, r: &VarRef, log: &mut ErrorLog) -> (String, i32) {
        // Simulation time and step size are method parameters.
        if r.binding.is_none() {
            match r.name.as_str() {
                "$t" => return ("t".to_string(), self.time_exp),
                "$dt" => return ("dt".to_string(), self.time_exp),
                _ => {}
            }
        }

        let Some((owner, idx)) = resolve_ref_checked(self.arena, self.comp, r, log) else {
            return ("0".to_string(), 0);
        };
        let var = &self.arena.get(owner).variables[idx];

        // Bespoke storage.
        if var.name == VAR_INDEX {
            return (format!("{}index_", self.recv_for(owner, false)), 0);
        }
        if var.name == VAR_LIVE {
            return (format!("{}live_value()", self.recv_for(owner, false)), 0);
        }

        let recv = self.recv_for(owner, var.tags.global);
        let field = if var.tags.global {
            pop_field_name(var)
        } else {
            field_name(var)
        };
        (format!("{}{}", recv, field), var.exponent)
    }

    fn recv_for(&self, owner: CompId, global: bool) -> String {
        if owner == self.comp {
            if global {
                self.pop_recv.to_string()
            } else {
                self.part_recv.to_string()
            }
        } else {
            // Reached through a connection binding: the Part holds a pointer
            // per binding, set by locate().
            let comp = self.arena.get(self.comp);
            let binding = comp
                .bindings
                .iter()
                .find(|b| b.target == owner)
                .map(|b| b.name.as_str())
                .unwrap_or("bound");
            if global {
                format!("{}{}_pop_->", self.part_recv, binding)
            } else {
                format!("{}{}_->", self.part_recv, binding)
            }
        }
    }

    /// Natural exponent of an expression; `fallback` applies where nothing
    /// intrinsic exists (literals, library calls).
    pub fn natural(&self, s: &dyn NumericStrategy, expr: &Expr, fallback: i32) -> i32 {
        if !s.is_fixed() {
            return 0;
        }
        match expr {
            Expr::Const(_) => fallback,
            Expr::Var(r) => {
                if r.binding.is_none() && (r.name == "$t" || r.name == "$dt") {
                    return self.time_exp;
                }
                match crate::ir::resolve::resolve_ref(self.arena, self.comp, r) {
                    Some((owner, idx)) => self.arena.get(owner).variables[idx].exponent,
                    None => fallback,
                }
            }
            Expr::Unary { rhs, .. } => self.natural(s, rhs, fallback),
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Add | BinOp::Sub => {
                    // Front end guarantees both sides share one exponent; a
                    // literal adopts the other side's.
                    let nl = self.natural(s, lhs, fallback);
                    if matches!(**lhs, Expr::Const(_)) {
                        self.natural(s, rhs, fallback)
                    } else {
                        nl
                    }
                }
                BinOp::Mul => {
                    let ea = self.natural(s, lhs, fallback);
                    let eb = self.natural(s, rhs, fallback);
                    s.natural_exp_mul(ea, eb)
                }
                BinOp::Div => {
                    let ea = self.natural(s, lhs, fallback);
                    let eb = self.natural(s, rhs, fallback);
                    s.natural_exp_div(ea, eb)
                }
                _ => 0,
            },
            Expr::Call { .. } => fallback,
        }
    }

    /// Render `expr` so the produced value carries exponent `want`.
    pub fn render(
        &self,
        s: &dyn NumericStrategy,
        expr: &Expr,
        want: i32,
        log: &mut ErrorLog,
    ) -> String {
        match expr {
            Expr::Const(v) => s.literal(*v, want),
            Expr::Var(r) => {
                let (rendered, exp) = self.render_ref(r, log);
                s.align(rendered, if s.is_fixed() { exp } else { 0 }, want)
            }
            Expr::Unary { op, rhs } => match op {
                UnOp::Neg => format!("(-{})", self.render(s, rhs, want, log)),
                UnOp::Not => format!("(!{})", self.render_bool(s, rhs, log)),
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Add | BinOp::Sub => {
                    let shared = self.natural(s, expr, want);
                    let l = self.render(s, lhs, shared, log);
                    let r = self.render(s, rhs, shared, log);
                    s.align(format!("({} {} {})", l, op.symbol(), r), shared, want)
                }
                BinOp::Mul => {
                    let ea = self.natural(s, lhs, want);
                    let eb = self.natural(s, rhs, want);
                    let l = self.render(s, lhs, ea, log);
                    let r = self.render(s, rhs, eb, log);
                    s.align(s.raw_mul(&l, &r), s.natural_exp_mul(ea, eb), want)
                }
                BinOp::Div => {
                    let ea = self.natural(s, lhs, want);
                    let eb = self.natural(s, rhs, want);
                    let l = self.render(s, lhs, ea, log);
                    let r = self.render(s, rhs, eb, log);
                    s.align(s.raw_div(&l, &r), s.natural_exp_div(ea, eb), want)
                }
                BinOp::And | BinOp::Or => format!(
                    "({} {} {})",
                    self.render_bool(s, lhs, log),
                    op.symbol(),
                    self.render_bool(s, rhs, log)
                ),
                // Comparison: operands meet at a shared exponent; the result
                // is a plain boolean, no scaling.
                _ => {
                    let shared = self.natural(s, lhs, self.natural(s, rhs, 0));
                    let l = self.render(s, lhs, shared, log);
                    let r = self.render(s, rhs, shared, log);
                    format!("({} {} {})", l, op.symbol(), r)
                }
            },
            Expr::Call { func, args } => {
                let rendered: Vec<(String, i32)> = args
                    .iter()
                    .map(|a| {
                        let e = self.natural(s, a, want);
                        (self.render(s, a, e, log), e)
                    })
                    .collect();
                s.call(*func, &rendered, want)
            }
        }
    }

    /// Render a guard or other boolean context.
    pub fn render_bool(&self, s: &dyn NumericStrategy, expr: &Expr, log: &mut ErrorLog) -> String {
        match expr {
            Expr::Binary { op, .. } if op.is_boolean() => self.render(s, expr, 0, log),
            Expr::Unary { op: UnOp::Not, .. } => self.render(s, expr, 0, log),
            // A bare value used as a condition: non-zero means true.
            _ => {
                let e = self.natural(s, expr, 0);
                format!("({} != {})", self.render(s, expr, e, log), s.literal(0.0, e))
            }
        }
    }
}
