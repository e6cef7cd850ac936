//! Numeric emission strategies.
//!
//! The emitter is written once against [`NumericStrategy`]; the floating
//! point and scaled-integer variants differ only in literal printing, in the
//! raw multiply/divide forms, in operand alignment shifts, and in library
//! calls. Every fixed-point shift in the generated program is computed here,
//! at emission time, from statically propagated exponents; nothing is ever
//! shifted by a run-time amount.
//!
//! Encoding convention: an integer `i` with exponent `e` represents the real
//! value `i / 2^e` (`e` counts fraction bits). Aligning a value from
//! exponent `from` to `to` is `i >> (from - to)`, with a zero shift emitted
//! as no shift at all.

use crate::ir::expr::Func;

pub trait NumericStrategy {
    /// The storage type of every model value.
    fn value_type(&self) -> &'static str;

    fn is_fixed(&self) -> bool;

    /// Render a real literal at the given exponent.
    fn literal(&self, v: f64, exp: i32) -> String;

    /// Natural exponent of a raw product / quotient of operands at `ea`,
    /// `eb`. Always zero in floating point.
    fn natural_exp_mul(&self, ea: i32, eb: i32) -> i32;
    fn natural_exp_div(&self, ea: i32, eb: i32) -> i32;

    /// The raw multiply / divide expression (before alignment).
    fn raw_mul(&self, a: &str, b: &str) -> String;
    fn raw_div(&self, a: &str, b: &str) -> String;

    /// Align a rendered operand from one exponent to another.
    fn align(&self, rendered: String, from: i32, to: i32) -> String;

    /// Render a library call; `args` are rendered operands with their
    /// exponents, `want` is the desired result exponent.
    fn call(&self, func: Func, args: &[(String, i32)], want: i32) -> String;

    /// Divide by two, scale-preserving (integrator stage scaling).
    fn halve(&self, rendered: &str) -> String;

    /// Divide by a small plain integer, scale-preserving (stage weights).
    fn div_small_int(&self, rendered: &str, n: i64) -> String;
}

// ---------------------------------------------------------------------------
// Floating point
// ---------------------------------------------------------------------------

pub struct FloatStrategy {
    pub single: bool,
}

impl FloatStrategy {
    fn suffix(&self) -> &'static str {
        if self.single {
            "f"
        } else {
            ""
        }
    }
}

impl NumericStrategy for FloatStrategy {
    fn value_type(&self) -> &'static str {
        if self.single {
            "float"
        } else {
            "double"
        }
    }

    fn is_fixed(&self) -> bool {
        false
    }

    fn literal(&self, v: f64, _exp: i32) -> String {
        if v.is_nan() {
            return "NAN".to_string();
        }
        if v.is_infinite() {
            return if v > 0.0 { "INFINITY" } else { "-INFINITY" }.to_string();
        }
        if v == v.trunc() && v.abs() < 1e15 {
            format!("{:.1}{}", v, self.suffix())
        } else {
            format!("{}{}", v, self.suffix())
        }
    }

    fn natural_exp_mul(&self, _ea: i32, _eb: i32) -> i32 {
        0
    }

    fn natural_exp_div(&self, _ea: i32, _eb: i32) -> i32 {
        0
    }

    fn raw_mul(&self, a: &str, b: &str) -> String {
        format!("({} * {})", a, b)
    }

    fn raw_div(&self, a: &str, b: &str) -> String {
        format!("({} / {})", a, b)
    }

    fn align(&self, rendered: String, _from: i32, _to: i32) -> String {
        rendered
    }

    fn call(&self, func: Func, args: &[(String, i32)], _want: i32) -> String {
        let joined = args
            .iter()
            .map(|(s, _)| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", func.float_name(), joined)
    }

    fn halve(&self, rendered: &str) -> String {
        format!("({} / 2.0{})", rendered, self.suffix())
    }

    fn div_small_int(&self, rendered: &str, n: i64) -> String {
        format!("({} / {}.0{})", rendered, n, self.suffix())
    }
}

// ---------------------------------------------------------------------------
// Fixed point (scaled integer)
// ---------------------------------------------------------------------------

pub struct FixedStrategy {
    pub bits: u8,
}

impl FixedStrategy {
    pub fn halfwidth(&self) -> i32 {
        i32::from(self.bits) / 2
    }

    fn wide_type(&self) -> &'static str {
        if self.bits <= 16 {
            "int32_t"
        } else {
            "int64_t"
        }
    }

    fn int_min(&self) -> i64 {
        -(1i64 << (self.bits - 1))
    }

    fn int_max(&self) -> i64 {
        (1i64 << (self.bits - 1)) - 1
    }

    /// Encode a real literal as a scaled integer. Infinities saturate to the
    /// representable extremes; NaN becomes the minimum integer, kept as a
    /// sentinel by the runtime helpers.
    pub fn encode(&self, v: f64, exp: i32) -> i64 {
        if v.is_nan() {
            return self.int_min();
        }
        if v == f64::INFINITY {
            return self.int_max();
        }
        if v == f64::NEG_INFINITY {
            return self.int_min();
        }
        let scaled = (v * (2f64).powi(exp)).round();
        scaled.clamp(self.int_min() as f64, self.int_max() as f64) as i64
    }

    fn min_name(&self) -> &'static str {
        if self.bits <= 16 {
            "INT16_MIN"
        } else {
            "INT32_MIN"
        }
    }

    fn max_name(&self) -> &'static str {
        if self.bits <= 16 {
            "INT16_MAX"
        } else {
            "INT32_MAX"
        }
    }
}

impl NumericStrategy for FixedStrategy {
    fn value_type(&self) -> &'static str {
        if self.bits <= 16 {
            "int16_t"
        } else {
            "int32_t"
        }
    }

    fn is_fixed(&self) -> bool {
        true
    }

    fn literal(&self, v: f64, exp: i32) -> String {
        let encoded = self.encode(v, exp);
        if encoded == self.int_min() {
            self.min_name().to_string()
        } else if encoded == self.int_max() {
            self.max_name().to_string()
        } else {
            format!("{}", encoded)
        }
    }

    fn natural_exp_mul(&self, ea: i32, eb: i32) -> i32 {
        ea + eb - self.halfwidth()
    }

    fn natural_exp_div(&self, ea: i32, eb: i32) -> i32 {
        ea - eb + self.halfwidth()
    }

    fn raw_mul(&self, a: &str, b: &str) -> String {
        format!(
            "({})((({}){} * {}) >> {})",
            self.value_type(),
            self.wide_type(),
            a,
            b,
            self.halfwidth()
        )
    }

    fn raw_div(&self, a: &str, b: &str) -> String {
        format!(
            "({})(((({}){} << {}) / {}))",
            self.value_type(),
            self.wide_type(),
            a,
            self.halfwidth(),
            b
        )
    }

    fn align(&self, rendered: String, from: i32, to: i32) -> String {
        let shift = from - to;
        if shift == 0 {
            rendered
        } else if shift > 0 {
            format!("({} >> {})", rendered, shift)
        } else {
            format!("({} << {})", rendered, -shift)
        }
    }

    fn call(&self, func: Func, args: &[(String, i32)], want: i32) -> String {
        if func.is_transcendental() {
            // Runtime helpers take the operand exponent(s) and the desired
            // output exponent; the lowering contributes exponents, no shift.
            let mut parts = Vec::new();
            for (s, e) in args {
                parts.push(s.clone());
                parts.push(e.to_string());
            }
            parts.push(want.to_string());
            format!("{}({})", func.fixed_name(), parts.join(", "))
        } else {
            // min/max/abs are exact in integer form once operands agree on
            // the output exponent.
            let aligned: Vec<String> = args
                .iter()
                .map(|(s, e)| self.align(s.clone(), *e, want))
                .collect();
            let name = match func {
                Func::Min => "std::min",
                Func::Max => "std::max",
                _ => "std::abs",
            };
            format!("{}({})", name, aligned.join(", "))
        }
    }

    fn halve(&self, rendered: &str) -> String {
        format!("({} >> 1)", rendered)
    }

    fn div_small_int(&self, rendered: &str, n: i64) -> String {
        format!("({} / {})", rendered, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Re-create the emitted integer arithmetic so the shift rules can be
    /// checked against real arithmetic without a C++ toolchain.
    fn apply_shift(v: i64, shift: i32) -> i64 {
        if shift >= 0 {
            v >> shift
        } else {
            v << (-shift)
        }
    }

    #[test]
    fn test_mul_shift_identity() {
        let s = FixedStrategy { bits: 32 };
        let half = s.halfwidth();
        for ea in -4..8 {
            for eb in -4..8 {
                for er in -4..8 {
                    let natural = s.natural_exp_mul(ea, eb);
                    let shift = natural - er;
                    // er = ea + eb - HALFWIDTH - shift
                    assert_eq!(er, ea + eb - half - shift);
                }
            }
        }
    }

    #[test]
    fn test_div_shift_identity() {
        let s = FixedStrategy { bits: 32 };
        let half = s.halfwidth();
        for ea in -4..8 {
            for eb in -4..8 {
                for er in -4..8 {
                    let natural = s.natural_exp_div(ea, eb);
                    let shift = natural - er;
                    // er = ea - eb + HALFWIDTH - shift
                    assert_eq!(er, ea - eb + half - shift);
                }
            }
        }
    }

    #[test]
    fn test_mul_value_matches_float_within_one_ulp() {
        let s = FixedStrategy { bits: 32 };
        let half = s.halfwidth();
        let cases = [
            (1.5f64, 2.25f64, 16, 16, 16),
            (0.125, 8.0, 20, 10, 12),
            (-3.5, 0.5, 14, 18, 10),
        ];
        for (a, b, ea, eb, er) in cases {
            let ia = s.encode(a, ea);
            let ib = s.encode(b, eb);
            let raw = (ia * ib) >> half;
            let shift = s.natural_exp_mul(ea, eb) - er;
            let result = apply_shift(raw, shift);
            let expect = s.encode(a * b, er);
            assert!(
                (result - expect).abs() <= 1,
                "{} * {} at exps ({}, {}) -> {}: got {}, want {}",
                a,
                b,
                ea,
                eb,
                er,
                result,
                expect
            );
        }
    }

    #[test]
    fn test_div_value_matches_float_within_one_ulp() {
        let s = FixedStrategy { bits: 32 };
        let half = s.halfwidth();
        let cases = [
            (3.0f64, 1.5f64, 16, 16, 16),
            (1.0, 4.0, 20, 20, 16),
            (-7.5, 2.5, 12, 14, 10),
        ];
        for (a, b, ea, eb, er) in cases {
            let ia = s.encode(a, ea);
            let ib = s.encode(b, eb);
            let raw = (ia << half) / ib;
            let shift = s.natural_exp_div(ea, eb) - er;
            let result = apply_shift(raw, shift);
            let expect = s.encode(a / b, er);
            assert!(
                (result - expect).abs() <= 1,
                "{} / {} -> got {}, want {}",
                a,
                b,
                result,
                expect
            );
        }
    }

    #[test]
    fn test_zero_shift_emits_no_op() {
        let s = FixedStrategy { bits: 32 };
        assert_eq!(s.align("x".to_string(), 16, 16), "x");
        assert_eq!(s.align("x".to_string(), 18, 16), "(x >> 2)");
        assert_eq!(s.align("x".to_string(), 14, 16), "(x << 2)");
    }

    #[test]
    fn test_literal_saturation_and_sentinel() {
        let s = FixedStrategy { bits: 32 };
        assert_eq!(s.literal(f64::INFINITY, 16), "INT32_MAX");
        assert_eq!(s.literal(f64::NEG_INFINITY, 16), "INT32_MIN");
        assert_eq!(s.literal(f64::NAN, 16), "INT32_MIN");
        assert_eq!(s.literal(1.5, 16), format!("{}", 3 << 15));
    }

    #[test]
    fn test_float_literals() {
        let d = FloatStrategy { single: false };
        assert_eq!(d.literal(2.0, 0), "2.0");
        assert_eq!(d.literal(0.25, 0), "0.25");
        let f = FloatStrategy { single: true };
        assert_eq!(f.literal(2.0, 0), "2.0f");
        assert_eq!(f.literal(f64::NAN, 0), "NAN");
    }

    #[test]
    fn test_transcendental_call_carries_exponents() {
        let s = FixedStrategy { bits: 32 };
        let call = s.call(Func::Exp, &[("x".to_string(), 16)], 12);
        assert_eq!(call, "fx_exp(x, 16, 12)");
        let norm = s.call(
            Func::Norm,
            &[("x".to_string(), 16), ("y".to_string(), 14)],
            16,
        );
        assert_eq!(norm, "fx_norm(x, 16, y, 14, 16)");
    }
}
