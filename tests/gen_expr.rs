//! Random expressions checked against a precedence-climbing reference
//! evaluator.

use libtest_mimic::{Arguments, Failed, Trial};
use rand::{Rng, SeedableRng, rngs::StdRng};

use rv32dbg::{
    memory::MemoryError,
    monitor::expr::{Environment, Evaluator, ExprError},
};

const SEEDS: u64 = 32;
const EXPRS_PER_SEED: usize = 200;
const MAX_DEPTH: u32 = 6;

struct NoMachine;

impl Environment for NoMachine {
    fn register(&self, _name: &str) -> Option<u32> {
        None
    }

    fn read_word(&self, addr: u32) -> Result<u32, MemoryError> {
        Err(MemoryError::Unmapped { addr, size: 4 })
    }
}

fn space(rng: &mut StdRng, out: &mut String) {
    if rng.random_bool(0.2) {
        out.push(' ');
    }
}

fn gen_num(rng: &mut StdRng, out: &mut String) {
    let n = match rng.random_range(0..4) {
        0 => rng.random::<u32>(),
        1 => rng.random_range(0..16),
        _ => rng.random_range(0..1000),
    };
    if rng.random_bool(0.25) {
        out.push_str(&format!("{n:#x}"));
    } else {
        out.push_str(&n.to_string());
    }
}

fn gen_expr(rng: &mut StdRng, depth: u32, out: &mut String) {
    if depth == 0 {
        gen_num(rng, out);
        return;
    }
    match rng.random_range(0..6) {
        0 => gen_num(rng, out),
        1 => {
            out.push('(');
            space(rng, out);
            gen_expr(rng, depth - 1, out);
            space(rng, out);
            out.push(')');
        }
        2 => {
            out.push('-');
            gen_expr(rng, depth - 1, out);
        }
        _ => {
            const OPS: [&str; 7] = ["+", "-", "*", "/", "==", "!=", "&&"];
            gen_expr(rng, depth - 1, out);
            space(rng, out);
            out.push_str(OPS[rng.random_range(0..OPS.len())]);
            space(rng, out);
            gen_expr(rng, depth - 1, out);
        }
    }
}

#[derive(Debug, PartialEq)]
enum RefError {
    DivideByZero,
}

/// Recursive descent over the expression text, one function per
/// precedence level. A division by zero is recorded and parsing carries on
/// with a zero quotient.
struct Reference<'a> {
    src: &'a [u8],
    pos: usize,
    divided_by_zero: bool,
}

impl Reference<'_> {
    fn eval(text: &str) -> Result<u32, RefError> {
        let mut parser = Reference {
            src: text.as_bytes(),
            pos: 0,
            divided_by_zero: false,
        };
        let value = parser.and();
        parser.skip_spaces();
        assert_eq!(parser.pos, parser.src.len(), "unparsed input in `{text}`");
        if parser.divided_by_zero {
            Err(RefError::DivideByZero)
        } else {
            Ok(value)
        }
    }

    fn skip_spaces(&mut self) {
        while self.src.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        self.skip_spaces();
        if self.src[self.pos..].starts_with(op.as_bytes()) {
            self.pos += op.len();
            true
        } else {
            false
        }
    }

    fn and(&mut self) -> u32 {
        let mut lhs = self.equality();
        while self.eat("&&") {
            let rhs = self.equality();
            lhs = (lhs != 0 && rhs != 0) as u32;
        }
        lhs
    }

    fn equality(&mut self) -> u32 {
        let mut lhs = self.additive();
        loop {
            if self.eat("==") {
                lhs = (lhs == self.additive()) as u32;
            } else if self.eat("!=") {
                lhs = (lhs != self.additive()) as u32;
            } else {
                return lhs;
            }
        }
    }

    fn additive(&mut self) -> u32 {
        let mut lhs = self.multiplicative();
        loop {
            if self.eat("+") {
                lhs = lhs.wrapping_add(self.multiplicative());
            } else if self.eat("-") {
                lhs = lhs.wrapping_sub(self.multiplicative());
            } else {
                return lhs;
            }
        }
    }

    fn multiplicative(&mut self) -> u32 {
        let mut lhs = self.unary();
        loop {
            if self.eat("*") {
                lhs = lhs.wrapping_mul(self.unary());
            } else if self.eat("/") {
                let rhs = self.unary();
                lhs = lhs.checked_div(rhs).unwrap_or_else(|| {
                    self.divided_by_zero = true;
                    0
                });
            } else {
                return lhs;
            }
        }
    }

    fn unary(&mut self) -> u32 {
        if self.eat("-") {
            return self.unary().wrapping_neg();
        }
        self.primary()
    }

    fn primary(&mut self) -> u32 {
        if self.eat("(") {
            let value = self.and();
            assert!(self.eat(")"), "unclosed paren");
            return value;
        }
        self.skip_spaces();
        let rest = &self.src[self.pos..];
        let (radix, start) = if rest.starts_with(b"0x") { (16, 2) } else { (10, 0) };
        let len = rest[start..]
            .iter()
            .take_while(|c| c.is_ascii_hexdigit() && (radix == 16 || c.is_ascii_digit()))
            .count();
        let digits = std::str::from_utf8(&rest[start..start + len]).unwrap();
        self.pos += start + len;
        u32::from_str_radix(digits, radix).unwrap()
    }
}

/// Expressions where a division by zero sits in the middle of the text.
const FIXED: &[&str] = &[
    "1/0 + 1",
    "(0x39bbd9f6/(10*381==962 -(393/3)))",
    "2 && 5/(3-3) == 0",
    "-(4/0) * 7",
];

fn check(evaluator: &mut Evaluator, text: &str) -> Result<(), Failed> {
    let expected = Reference::eval(text);
    let actual = evaluator.evaluate(text, &NoMachine);
    match (&expected, &actual) {
        (Ok(e), Ok(a)) if e == a => Ok(()),
        (Err(RefError::DivideByZero), Err(ExprError::DivideByZero)) => Ok(()),
        _ => Err(format!("`{text}`: expected {expected:?}, got {actual:?}").into()),
    }
}

fn check_fixed() -> Result<(), Failed> {
    let mut evaluator = Evaluator::new();
    for text in FIXED {
        assert_eq!(Reference::eval(text), Err(RefError::DivideByZero), "{text}");
        check(&mut evaluator, text)?;
    }
    Ok(())
}

fn check_seed(seed: u64) -> Result<(), Failed> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut evaluator = Evaluator::new();

    for _ in 0..EXPRS_PER_SEED {
        let mut text = String::new();
        gen_expr(&mut rng, MAX_DEPTH, &mut text);
        check(&mut evaluator, &text)?;
    }
    Ok(())
}

fn main() {
    let args = Arguments::from_args();
    let mut trials = vec![Trial::test("division_by_zero_mid_expression", check_fixed)];
    trials.extend(
        (0..SEEDS).map(|seed| Trial::test(format!("random_exprs_seed_{seed}"), move || check_seed(seed))),
    );
    libtest_mimic::run(&args, trials).exit();
}
