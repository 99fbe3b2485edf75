use crate::encoding::{widen, word};
use crate::{Error, Word, WORD_WIDTH};
use std::fmt::Debug;
use z3::ast::{Ast, Bool, BV as BitVec};

/// A target function `BitVec[W] -> BitVec[W]`, expressed at the SMT layer.
///
/// The one builder serves both phases of the search: applied to a fresh
/// variable it is the verification oracle, applied to a constant and
/// simplified it is the ground truth for synthesis queries. Implementations
/// must be pure; `eval_concrete` reports a builder that fails to collapse to
/// a constant.
pub trait Specification: Debug {
    fn name(&self) -> &str;

    fn make_expression<'a>(
        &self,
        context: &'a z3::Context,
        input: &BitVec<'a>,
    ) -> BitVec<'a>;

    fn eval_concrete(&self, context: &z3::Context, x: Word) -> Result<Word, Error> {
        let expr = self.make_expression(context, &word(context, x)).simplify();
        expr.as_u64().map(|v| v as Word).ok_or_else(|| {
            Error::Specification(format!(
                "`{}` did not simplify to a constant on input {:#x}",
                self.name(),
                x
            ))
        })
    }
}

pub const DEFAULT_SPEC: &str = "is-power-of-two-or-zero";

/// Look up a built-in specification by name.
pub fn lookup(name: &str) -> Option<Box<dyn Specification>> {
    match name {
        "identity" => Some(Box::new(Identity)),
        "zero" => Some(Box::new(Zero)),
        "is-zero" => Some(Box::new(IsZero)),
        "decrement" => Some(Box::new(Decrement)),
        "is-power-of-two-or-zero" => Some(Box::new(IsPowerOfTwoOrZero)),
        _ => None,
    }
}

pub fn names() -> &'static [&'static str] {
    &[
        "identity",
        "zero",
        "is-zero",
        "decrement",
        "is-power-of-two-or-zero",
    ]
}

#[derive(Debug)]
pub struct Identity;

impl Specification for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn make_expression<'a>(&self, _: &'a z3::Context, input: &BitVec<'a>) -> BitVec<'a> {
        input.clone()
    }
}

#[derive(Debug)]
pub struct Zero;

impl Specification for Zero {
    fn name(&self) -> &str {
        "zero"
    }

    fn make_expression<'a>(&self, context: &'a z3::Context, _: &BitVec<'a>) -> BitVec<'a> {
        word(context, 0)
    }
}

#[derive(Debug)]
pub struct IsZero;

impl Specification for IsZero {
    fn name(&self) -> &str {
        "is-zero"
    }

    fn make_expression<'a>(&self, context: &'a z3::Context, input: &BitVec<'a>) -> BitVec<'a> {
        widen(context, &input._eq(&word(context, 0)))
    }
}

#[derive(Debug)]
pub struct Decrement;

impl Specification for Decrement {
    fn name(&self) -> &str {
        "decrement"
    }

    fn make_expression<'a>(&self, context: &'a z3::Context, input: &BitVec<'a>) -> BitVec<'a> {
        input.bvsub(&word(context, 1))
    }
}

/// 1 when the input has at most one bit set, 0 otherwise.
#[derive(Debug)]
pub struct IsPowerOfTwoOrZero;

impl Specification for IsPowerOfTwoOrZero {
    fn name(&self) -> &str {
        "is-power-of-two-or-zero"
    }

    fn make_expression<'a>(&self, context: &'a z3::Context, input: &BitVec<'a>) -> BitVec<'a> {
        let mut matched = input._eq(&word(context, 0));
        let mut power: Word = 1;
        for _ in 0..WORD_WIDTH {
            matched = Bool::or(context, &[&matched, &input._eq(&word(context, power))]);
            power = power.wrapping_shl(1);
        }
        widen(context, &matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> z3::Context {
        let mut config = z3::Config::new();
        config.set_model_generation(true);
        z3::Context::new(&config)
    }

    #[test]
    fn registry_knows_every_name() {
        for name in names() {
            let spec = lookup(name).unwrap();
            assert_eq!(spec.name(), *name);
        }
        assert!(lookup("no-such-spec").is_none());
        assert!(names().contains(&DEFAULT_SPEC));
    }

    #[test]
    fn concrete_outputs() {
        let context = context();
        assert_eq!(Identity.eval_concrete(&context, 5).unwrap(), 5);
        assert_eq!(Zero.eval_concrete(&context, 0xdead).unwrap(), 0);
        assert_eq!(IsZero.eval_concrete(&context, 0).unwrap(), 1);
        assert_eq!(IsZero.eval_concrete(&context, 9).unwrap(), 0);
        assert_eq!(Decrement.eval_concrete(&context, 0).unwrap(), u32::MAX);
        assert_eq!(Decrement.eval_concrete(&context, 10).unwrap(), 9);
    }

    #[test]
    fn power_of_two_or_zero_table() {
        let context = context();
        let spec = IsPowerOfTwoOrZero;
        for (x, want) in [
            (0u32, 1u32),
            (1, 1),
            (2, 1),
            (3, 0),
            (4, 1),
            (6, 0),
            (0x8000_0000, 1),
            (0x8000_0001, 0),
            (u32::MAX, 0),
        ] {
            assert_eq!(spec.eval_concrete(&context, x).unwrap(), want, "x = {:#x}", x);
        }
    }

    #[test]
    fn adapters_are_deterministic() {
        let context = context();
        for name in names() {
            let spec = lookup(name).unwrap();
            for x in [0u32, 1, 0xff, 0x100, u32::MAX] {
                let first = spec.eval_concrete(&context, x).unwrap();
                let second = spec.eval_concrete(&context, x).unwrap();
                assert_eq!(first, second, "{} at {:#x}", name, x);
            }
        }
    }
}
