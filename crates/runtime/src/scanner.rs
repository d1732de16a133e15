//! Token scanner
//!
//! The dispatcher does not tokenize; it hands the unread bytes of a file or
//! executable string to a [`Scanner`] and acts on the [`ScanStatus`]:
//!
//! | Status              | Consumed                 | Dispatcher action                  |
//! |---------------------|--------------------------|------------------------------------|
//! | `Token(v)`          | through the token        | push literal / execute executable  |
//! | `Eof`               | everything               | pop the source                     |
//! | `Refill`            | leading whitespace only  | pull more bytes, scan again        |
//! | `Comment(text)`     | through the line end     | hand to `ProcessComment`           |
//! | `BinarySequence(v)` | the whole sequence       | execute `v` as a procedure         |
//! | `Error(code)`       | through the bad token    | raise `code` against the source    |
//!
//! `Refill` is only ever returned when the source is not at end of file and a
//! token could continue past the end of the input. A partially scanned token
//! is never consumed, so scanning resumes from its first byte.
//!
//! ## Syntax
//!
//! [`PsScanner`] reads the PostScript text syntax (numbers, radix numbers,
//! literal, executable and immediate names, `(...)` and `<hex>` strings,
//! `{ }` procedures, `[ ] << >>`, `%` comments) plus the binary token
//! encodings in the 128..=159 range, including binary object sequences.

use crate::context::Context;
use psi_core::{ErrorCode, Value};

/// Per-call scanning switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Return `%` comments instead of skipping them.
    pub report_comments: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanStatus {
    Token(Value),
    Eof,
    Refill,
    Comment(Vec<u8>),
    BinarySequence(Value),
    Error(ErrorCode),
}

/// A tokenizer the dispatcher calls for file and string sources.
pub trait Scanner {
    /// Scan one token from `input`. Returns the outcome and the number of
    /// bytes consumed.
    fn scan(
        &self,
        ctx: &mut Context,
        input: &[u8],
        at_eof: bool,
        options: ScanOptions,
    ) -> (ScanStatus, usize);
}

/// The standard PostScript scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsScanner;

/// Procedure nesting beyond this is a `limitcheck`.
const MAX_PROC_DEPTH: usize = 100;

enum Halt {
    Refill,
    Error(ErrorCode),
}

type Lex<T> = Result<T, Halt>;

enum Tok {
    Value(Value),
    ProcEnd,
    Binary(Value),
}

fn is_white(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0c | 0)
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(b: u8) -> bool {
    !is_white(b) && !is_delimiter(b)
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// The input ran out inside a token.
    fn more<T>(&self) -> Lex<T> {
        Err(if self.at_eof {
            Halt::Error(ErrorCode::SyntaxError)
        } else {
            Halt::Refill
        })
    }

    fn next(&mut self) -> Lex<u8> {
        match self.peek() {
            Some(b) => {
                self.pos += 1;
                Ok(b)
            }
            None => self.more(),
        }
    }

    fn take(&mut self, n: usize) -> Lex<&'a [u8]> {
        if self.input.len() - self.pos < n {
            return self.more();
        }
        let bytes = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn skip_white(&mut self) {
        while self.peek().is_some_and(is_white) {
            self.pos += 1;
        }
    }

    /// Skip a `%` comment starting at `pos`. Returns its text (without the
    /// `%` and line end).
    fn comment(&mut self) -> Lex<&'a [u8]> {
        let start = self.pos + 1;
        let rest = &self.input[start..];
        match rest.iter().position(|&b| b == b'\n' || b == b'\r' || b == 0x0c) {
            Some(i) => {
                self.pos = start + i + 1;
                Ok(&rest[..i])
            }
            None if self.at_eof => {
                self.pos = self.input.len();
                Ok(rest)
            }
            None => Err(Halt::Refill),
        }
    }

    fn regular_run(&mut self) -> Lex<&'a [u8]> {
        let start = self.pos;
        while self.peek().is_some_and(is_regular) {
            self.pos += 1;
        }
        if self.pos == self.input.len() && !self.at_eof {
            return Err(Halt::Refill);
        }
        Ok(&self.input[start..self.pos])
    }

    fn token(&mut self, ctx: &mut Context, depth: usize) -> Lex<Tok> {
        let b = self.next()?;
        let v = match b {
            b'(' => self.string(ctx)?,
            b'<' => match self.peek() {
                None => return self.more(),
                Some(b'<') => {
                    self.pos += 1;
                    exec_name(ctx, b"<<")
                }
                Some(_) => self.hex_string(ctx)?,
            },
            b'>' => match self.peek() {
                None => return self.more(),
                Some(b'>') => {
                    self.pos += 1;
                    exec_name(ctx, b">>")
                }
                Some(_) => return Err(Halt::Error(ErrorCode::SyntaxError)),
            },
            b'[' => exec_name(ctx, b"["),
            b']' => exec_name(ctx, b"]"),
            b'{' => self.procedure(ctx, depth + 1)?,
            b'}' => return Ok(Tok::ProcEnd),
            b')' => return Err(Halt::Error(ErrorCode::SyntaxError)),
            b'/' => {
                if self.peek() == Some(b'/') {
                    self.pos += 1;
                    let text = self.regular_run()?;
                    let n = ctx.names.intern(text);
                    ctx.lookup_name(n)
                        .ok_or(Halt::Error(ErrorCode::Undefined))?
                } else if self.peek().is_none() && !self.at_eof {
                    return Err(Halt::Refill);
                } else {
                    let text = self.regular_run()?;
                    Value::name(ctx.names.intern(text))
                }
            }
            128..=159 => {
                self.pos -= 1;
                return self.binary(ctx);
            }
            _ => {
                self.pos -= 1;
                let text = self.regular_run()?;
                parse_number(text).unwrap_or_else(|| exec_name(ctx, text))
            }
        };
        Ok(Tok::Value(v))
    }

    fn procedure(&mut self, ctx: &mut Context, depth: usize) -> Lex<Value> {
        if depth > MAX_PROC_DEPTH {
            return Err(Halt::Error(ErrorCode::LimitCheck));
        }
        let mut values = Vec::new();
        loop {
            self.skip_white();
            match self.peek() {
                None => return self.more(),
                Some(b'%') => {
                    self.comment()?;
                    continue;
                }
                Some(_) => {}
            }
            match self.token(ctx, depth)? {
                Tok::ProcEnd => break,
                Tok::Value(v) | Tok::Binary(v) => values.push(v),
            }
        }
        ctx.alloc_proc(values).map_err(Halt::Error)
    }

    fn string(&mut self, ctx: &mut Context) -> Lex<Value> {
        let mut bytes = Vec::new();
        let mut depth = 1;
        loop {
            let b = self.next()?;
            match b {
                b'(' => {
                    depth += 1;
                    bytes.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    bytes.push(b);
                }
                b'\\' => self.escape(&mut bytes)?,
                _ => bytes.push(b),
            }
        }
        Ok(ctx.alloc_string(bytes))
    }

    fn escape(&mut self, bytes: &mut Vec<u8>) -> Lex<()> {
        let b = self.next()?;
        match b {
            b'n' => bytes.push(b'\n'),
            b'r' => bytes.push(b'\r'),
            b't' => bytes.push(b'\t'),
            b'b' => bytes.push(0x08),
            b'f' => bytes.push(0x0c),
            b'\n' => {}
            b'\r' => match self.peek() {
                Some(b'\n') => self.pos += 1,
                None if !self.at_eof => return Err(Halt::Refill),
                _ => {}
            },
            b'0'..=b'7' => {
                let mut code = (b - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            self.pos += 1;
                            code = code * 8 + (d - b'0') as u32;
                        }
                        None if !self.at_eof => return Err(Halt::Refill),
                        _ => break,
                    }
                }
                bytes.push((code & 0xff) as u8);
            }
            other => bytes.push(other),
        }
        Ok(())
    }

    fn hex_string(&mut self, ctx: &mut Context) -> Lex<Value> {
        let mut bytes = Vec::new();
        let mut high: Option<u8> = None;
        loop {
            let b = self.next()?;
            let digit = match b {
                b'>' => break,
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                _ if is_white(b) => continue,
                _ => return Err(Halt::Error(ErrorCode::SyntaxError)),
            };
            match high.take() {
                Some(h) => bytes.push(h << 4 | digit),
                None => high = Some(digit),
            }
        }
        if let Some(h) = high {
            bytes.push(h << 4);
        }
        Ok(ctx.alloc_string(bytes))
    }

    // =========================================================================
    // Binary encodings
    // =========================================================================

    fn binary(&mut self, ctx: &mut Context) -> Lex<Tok> {
        let b = self.next()?;
        let v = match b {
            128..=131 => return self.binary_sequence(ctx, b).map(Tok::Binary),
            132 => Value::integer(i32::from_be_bytes(array4(self.take(4)?)) as i64),
            133 => Value::integer(i32::from_le_bytes(array4(self.take(4)?)) as i64),
            134 => Value::integer(i16::from_be_bytes(array2(self.take(2)?)) as i64),
            135 => Value::integer(i16::from_le_bytes(array2(self.take(2)?)) as i64),
            136 => Value::integer(self.take(1)?[0] as i8 as i64),
            138 => Value::real(f32::from_be_bytes(array4(self.take(4)?)) as f64),
            139 => Value::real(f32::from_le_bytes(array4(self.take(4)?)) as f64),
            141 => Value::boolean(self.take(1)?[0] != 0),
            142 => {
                let len = self.take(1)?[0] as usize;
                let bytes = self.take(len)?.to_vec();
                ctx.alloc_string(bytes)
            }
            143 | 144 => {
                let len = read_u16(self.take(2)?, b == 143) as usize;
                let bytes = self.take(len)?.to_vec();
                ctx.alloc_string(bytes)
            }
            _ => return Err(Halt::Error(ErrorCode::SyntaxError)),
        };
        Ok(Tok::Value(v))
    }

    /// A binary object sequence; the result is an executable array of the
    /// top-level objects.
    fn binary_sequence(&mut self, ctx: &mut Context, token: u8) -> Lex<Value> {
        let big = token == 128 || token == 130;
        let count_byte = self.take(1)?[0];
        let (count, total, header) = if count_byte != 0 {
            let len = read_u16(self.take(2)?, big) as usize;
            (count_byte as usize, len, 4)
        } else {
            let count = read_u16(self.take(2)?, big) as usize;
            let len = read_u32(self.take(4)?, big) as usize;
            (count, len, 8)
        };
        let body_len = total
            .checked_sub(header)
            .ok_or(Halt::Error(ErrorCode::SyntaxError))?;
        let area = self.take(body_len)?;
        let seq = BinarySeq { area, big };
        let values = seq.objects(ctx, 0, count, 0)?;
        ctx.alloc_array(values)
            .map(Value::cvx)
            .map_err(Halt::Error)
    }
}

fn array2(b: &[u8]) -> [u8; 2] {
    [b[0], b[1]]
}

fn array4(b: &[u8]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

fn read_u16(b: &[u8], big: bool) -> u16 {
    if big {
        u16::from_be_bytes(array2(b))
    } else {
        u16::from_le_bytes(array2(b))
    }
}

fn read_u32(b: &[u8], big: bool) -> u32 {
    if big {
        u32::from_be_bytes(array4(b))
    } else {
        u32::from_le_bytes(array4(b))
    }
}

/// The object area of a binary object sequence. Offsets are relative to its
/// first byte.
struct BinarySeq<'a> {
    area: &'a [u8],
    big: bool,
}

impl BinarySeq<'_> {
    fn slice(&self, offset: usize, len: usize) -> Lex<&[u8]> {
        self.area
            .get(offset..offset.saturating_add(len))
            .ok_or(Halt::Error(ErrorCode::SyntaxError))
    }

    fn objects(
        &self,
        ctx: &mut Context,
        offset: usize,
        count: usize,
        depth: usize,
    ) -> Lex<Vec<Value>> {
        if depth > MAX_PROC_DEPTH {
            return Err(Halt::Error(ErrorCode::LimitCheck));
        }
        (0..count)
            .map(|i| {
                let obj = self.slice(offset + i * 8, 8)?;
                self.object(ctx, obj, depth)
            })
            .collect()
    }

    fn object(&self, ctx: &mut Context, obj: &[u8], depth: usize) -> Lex<Value> {
        let executable = obj[0] & 0x80 != 0;
        let len = read_u16(&obj[2..4], self.big) as usize;
        let raw = read_u32(&obj[4..8], self.big);
        let v = match obj[0] & 0x7f {
            0 => Value::NULL,
            1 => Value::integer(raw as i32 as i64),
            2 if len == 0 => Value::real(f32::from_bits(raw) as f64),
            2 => Value::real(raw as i32 as f64 / (1u64 << len.min(31)) as f64),
            3 | 6 if len == 0 || len == 0xffff => {
                return Err(Halt::Error(ErrorCode::Undefined));
            }
            3 => {
                let text = self.slice(raw as usize, len)?;
                Value::name(ctx.names.intern(text))
            }
            6 => {
                let text = self.slice(raw as usize, len)?;
                let n = ctx.names.intern(text);
                return ctx.lookup_name(n).ok_or(Halt::Error(ErrorCode::Undefined));
            }
            4 => Value::boolean(raw != 0),
            5 => {
                let bytes = self.slice(raw as usize, len)?.to_vec();
                ctx.alloc_string(bytes)
            }
            9 => {
                let values = self.objects(ctx, raw as usize, len, depth + 1)?;
                ctx.alloc_array(values).map_err(Halt::Error)?
            }
            10 => Value::mark(),
            _ => return Err(Halt::Error(ErrorCode::SyntaxError)),
        };
        Ok(if executable { v.cvx() } else { v })
    }
}

fn exec_name(ctx: &mut Context, text: &[u8]) -> Value {
    Value::exec_name(ctx.names.intern(text))
}

const SIGNS: &[char] = &['+', '-'];

fn all_digits(s: &[u8]) -> bool {
    !s.is_empty() && s.iter().all(u8::is_ascii_digit)
}

/// Parse a PostScript number. Integer overflow yields a real.
pub fn parse_number(text: &[u8]) -> Option<Value> {
    let s = std::str::from_utf8(text).ok()?;
    if let Some((base, digits)) = s.split_once('#') {
        if !all_digits(base.as_bytes()) {
            return None;
        }
        let radix: u32 = base.parse().ok()?;
        if !(2..=36).contains(&radix) || digits.is_empty() {
            return None;
        }
        return i64::from_str_radix(digits, radix)
            .ok()
            .filter(|_| !digits.starts_with(SIGNS))
            .map(Value::integer);
    }
    let unsigned = s.strip_prefix(SIGNS).unwrap_or(s);
    if all_digits(unsigned.as_bytes()) {
        return Some(match s.parse::<i64>() {
            Ok(i) => Value::integer(i),
            Err(_) => Value::real(s.parse::<f64>().ok()?),
        });
    }
    let (mantissa, exponent) = match unsigned.find(&['e', 'E'][..]) {
        Some(i) => (&unsigned[..i], Some(&unsigned[i + 1..])),
        None => (unsigned, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits_ok = (int_part.is_empty() || all_digits(int_part.as_bytes()))
        && (frac_part.is_empty() || all_digits(frac_part.as_bytes()))
        && !(int_part.is_empty() && frac_part.is_empty());
    let has_point = mantissa.contains('.');
    let exponent_ok = match exponent {
        Some(e) => all_digits(e.strip_prefix(SIGNS).unwrap_or(e).as_bytes()),
        None => true,
    };
    if digits_ok && exponent_ok && (has_point || exponent.is_some()) {
        s.parse::<f64>().ok().map(Value::real)
    } else {
        None
    }
}

impl Scanner for PsScanner {
    fn scan(
        &self,
        ctx: &mut Context,
        input: &[u8],
        at_eof: bool,
        options: ScanOptions,
    ) -> (ScanStatus, usize) {
        let mut lx = Lexer {
            input,
            pos: 0,
            at_eof,
        };
        loop {
            lx.skip_white();
            match lx.peek() {
                None if at_eof => return (ScanStatus::Eof, lx.pos),
                None => return (ScanStatus::Refill, lx.pos),
                Some(b'%') => {
                    let start = lx.pos;
                    match lx.comment() {
                        Ok(text) if options.report_comments => {
                            return (ScanStatus::Comment(text.to_vec()), lx.pos);
                        }
                        Ok(_) => continue,
                        Err(_) => return (ScanStatus::Refill, start),
                    }
                }
                Some(_) => break,
            }
        }
        let start = lx.pos;
        match lx.token(ctx, 0) {
            Ok(Tok::Value(v)) => (ScanStatus::Token(v), lx.pos),
            Ok(Tok::Binary(v)) => (ScanStatus::BinarySequence(v), lx.pos),
            Ok(Tok::ProcEnd) => (ScanStatus::Error(ErrorCode::SyntaxError), lx.pos),
            Err(Halt::Refill) => (ScanStatus::Refill, start),
            Err(Halt::Error(code)) => (ScanStatus::Error(code), lx.pos.max(start + 1)),
        }
    }
}
