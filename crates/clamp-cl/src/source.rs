//! Kernel-source scanning.
//!
//! Finds `__kernel` entry points in OpenCL C text and classifies each
//! parameter as a pointer (bound to a buffer) or a fixed-size scalar. This is
//! not a compiler: it checks only what the host reference driver needs to
//! accept or reject a program and to validate argument bindings.

use std::fmt;
use std::ops::Range;

use logos::{Lexer, Logos};

/// Address space of a pointer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Global,
    Constant,
    Local,
    Private,
}

/// One kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Pointer { space: AddressSpace, pointee: String },
    Scalar { type_name: String, size: usize },
}

impl ParamKind {
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer { .. })
    }
}

/// Parameter list of one `__kernel` entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub params: Vec<ParamKind>,
    /// 1-based line of the declaration.
    pub line: usize,
}

impl KernelSignature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A problem found while scanning, reported in compiler-log style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDiagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SourceDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<kernel>:{}: error: {}", self.line, self.message)
    }
}

/// Render diagnostics as a build log.
pub fn format_log(diagnostics: &[SourceDiagnostic]) -> String {
    let mut log = String::new();
    for d in diagnostics {
        log.push_str(&d.to_string());
        log.push('\n');
    }
    log.push_str(&format!("{} error(s) generated.\n", diagnostics.len()));
    log
}

/// Scan `source` for kernel entry points.
///
/// Fails with every diagnostic found: `#error` directives, unbalanced
/// delimiters, unterminated comments or literals and malformed kernel
/// declarations.
pub fn scan(source: &str) -> Result<Vec<KernelSignature>, Vec<SourceDiagnostic>> {
    let mut diagnostics = Vec::new();
    let code = lex(source, &mut diagnostics);
    check_delimiters(&code, &mut diagnostics);

    let kernels = if diagnostics.is_empty() {
        collect_kernels(&code, &mut diagnostics)
    } else {
        Vec::new()
    };

    if diagnostics.is_empty() { Ok(kernels) } else { Err(diagnostics) }
}

// ── Lexing ───────────────────────────────────────────────────────────────────

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"([ \t\r\n\f]+|//[^\n]*|\\\r?\n)")]
enum Tok {
    #[token("/*", block_comment)]
    BlockComment,
    #[regex(r"#[^\n]*")]
    Directive,
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    Str,
    #[regex(r#""([^"\\\n]|\\.)*"#)]
    OpenStr,
    #[regex(r"'([^'\\\n]|\\.)+'")]
    Char,
    #[regex(r"'([^'\\\n]|\\.)*")]
    OpenChar,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r"[0-9][0-9A-Za-z_.]*")]
    Number,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("*")]
    Star,
    #[regex(r"[-+/%&|^~!=<>?:;.]")]
    Punct,
}

/// Consume a `/* ... */` comment; an unterminated one is a lex error.
fn block_comment(lex: &mut Lexer<'_, Tok>) -> bool {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            true
        }
        None => {
            lex.bump(lex.remainder().len());
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lexeme<'a> {
    tok: Tok,
    text: &'a str,
    line: usize,
}

/// Tokenize, dropping comments and preprocessor lines (after reporting any
/// `#error`). Characters outside the language are skipped.
fn lex<'a>(source: &'a str, diagnostics: &mut Vec<SourceDiagnostic>) -> Vec<Lexeme<'a>> {
    let mut lexemes = Vec::new();
    let mut line = 1;
    let mut pos = 0;
    for (result, span) in Tok::lexer(source).spanned() {
        line += source.get(pos..span.start).map_or(0, |gap| gap.matches('\n').count());
        pos = span.start;
        let text = source.get(span).unwrap_or_default();
        match result {
            Ok(Tok::BlockComment) => {}
            Ok(Tok::OpenStr) => diagnostics.push(missing_quote(line, '"')),
            Ok(Tok::OpenChar) => diagnostics.push(missing_quote(line, '\'')),
            Ok(Tok::Directive) => {
                if let Some(msg) = text[1..].trim_start().strip_prefix("error") {
                    diagnostics.push(SourceDiagnostic {
                        line,
                        message: format!("#error{}", msg.trim_end()),
                    });
                }
            }
            Ok(tok) => lexemes.push(Lexeme { tok, text, line }),
            Err(()) if text.starts_with("/*") => diagnostics.push(SourceDiagnostic {
                line,
                message: "unterminated /* comment".into(),
            }),
            Err(()) => {}
        }
    }
    lexemes
}

fn missing_quote(line: usize, quote: char) -> SourceDiagnostic {
    SourceDiagnostic { line, message: format!("missing terminating {quote} character") }
}

fn check_delimiters(code: &[Lexeme<'_>], diagnostics: &mut Vec<SourceDiagnostic>) {
    let mut stack: Vec<&Lexeme<'_>> = Vec::new();
    for lexeme in code {
        let opener = match lexeme.tok {
            Tok::LParen | Tok::LBrace | Tok::LBracket => {
                stack.push(lexeme);
                continue;
            }
            Tok::RParen => Tok::LParen,
            Tok::RBrace => Tok::LBrace,
            Tok::RBracket => Tok::LBracket,
            _ => continue,
        };
        let message = match stack.pop() {
            Some(open) if open.tok == opener => continue,
            Some(open) => format!(
                "'{}' does not match '{}' opened on line {}",
                lexeme.text, open.text, open.line
            ),
            None => format!("unexpected '{}'", lexeme.text),
        };
        diagnostics.push(SourceDiagnostic { line: lexeme.line, message });
        return;
    }
    if let Some(open) = stack.last() {
        diagnostics.push(SourceDiagnostic {
            line: open.line,
            message: format!("unclosed '{}'", open.text),
        });
    }
}

// ── Kernel declarations ─────────────────────────────────────────────────────

fn collect_kernels(
    code: &[Lexeme<'_>],
    diagnostics: &mut Vec<SourceDiagnostic>,
) -> Vec<KernelSignature> {
    let mut kernels: Vec<KernelSignature> = Vec::new();
    let text = |i: usize| code.get(i).map(|l| l.text);
    let mut i = 0;
    while i < code.len() {
        if !matches!(code[i].text, "__kernel" | "kernel") {
            i += 1;
            continue;
        }
        let line = code[i].line;
        i = skip_attributes(code, i + 1);
        if text(i) != Some("void") {
            diagnostics.push(SourceDiagnostic {
                line,
                message: "kernel functions must return void".into(),
            });
            continue;
        }
        i = skip_attributes(code, i + 1);
        let Some(name) = code.get(i).filter(|l| l.tok == Tok::Ident) else {
            diagnostics.push(SourceDiagnostic { line, message: "expected kernel name".into() });
            continue;
        };
        if text(i + 1) != Some("(") {
            diagnostics.push(SourceDiagnostic {
                line,
                message: format!("expected '(' after kernel name '{}'", name.text),
            });
            i += 1;
            continue;
        }

        let (params, next) = split_params(code, i + 2);
        i = next;
        let mut kinds = Vec::with_capacity(params.len());
        for range in params {
            match classify_param(&code[range]) {
                Ok(kind) => kinds.push(kind),
                Err(message) => diagnostics.push(SourceDiagnostic { line, message }),
            }
        }

        if kernels.iter().any(|k| k.name == name.text) {
            diagnostics.push(SourceDiagnostic {
                line,
                message: format!("redefinition of kernel '{}'", name.text),
            });
            continue;
        }
        kernels.push(KernelSignature { name: name.text.to_string(), params: kinds, line });
    }
    kernels
}

/// Skip any `__attribute__((...))` starting at `i`.
fn skip_attributes(code: &[Lexeme<'_>], mut i: usize) -> usize {
    while code.get(i).map(|l| l.text) == Some("__attribute__") {
        i += 1;
        let mut depth = 0usize;
        while let Some(lexeme) = code.get(i) {
            i += 1;
            match lexeme.tok {
                Tok::LParen => depth += 1,
                Tok::RParen => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    i
}

/// Split the parameter list starting just after `(` into lexeme ranges;
/// also returns the index after the closing `)`.
fn split_params(code: &[Lexeme<'_>], start: usize) -> (Vec<Range<usize>>, usize) {
    let mut params = Vec::new();
    let mut param_start = start;
    let mut depth = 0usize;
    let mut i = start;
    while let Some(lexeme) = code.get(i) {
        match lexeme.tok {
            Tok::LParen | Tok::LBracket => depth += 1,
            Tok::RParen if depth == 0 => break,
            Tok::RParen | Tok::RBracket => depth = depth.saturating_sub(1),
            Tok::Comma if depth == 0 => {
                params.push(param_start..i);
                param_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if param_start < i {
        params.push(param_start..i);
    }
    // `f(void)` declares no parameters.
    let is_void = matches!(params.as_slice(),
        [only] if code[only.clone()].iter().map(|l| l.text).eq(["void"]));
    if is_void {
        params.clear();
    }
    (params, i + 1)
}

const QUALIFIERS: &[&str] =
    &["const", "volatile", "restrict", "__restrict", "__read_only", "__write_only", "read_only"];

fn classify_param(param: &[Lexeme<'_>]) -> Result<ParamKind, String> {
    let mut space = None;
    let mut type_words = Vec::new();
    let mut pointer = false;
    for lexeme in param {
        match (lexeme.tok, lexeme.text) {
            (Tok::Star, _) => pointer = true,
            (Tok::Ident, "__global" | "global") => space = Some(AddressSpace::Global),
            (Tok::Ident, "__constant" | "constant") => space = Some(AddressSpace::Constant),
            (Tok::Ident, "__local" | "local") => space = Some(AddressSpace::Local),
            (Tok::Ident, "__private" | "private") => space = Some(AddressSpace::Private),
            (Tok::Ident, t) if QUALIFIERS.contains(&t) => {}
            (Tok::Ident, t) => type_words.push(t),
            _ => {}
        }
    }
    // The last identifier is the parameter name.
    if type_words.len() < 2 {
        let written: Vec<&str> = param.iter().map(|l| l.text).collect();
        return Err(format!("malformed parameter '{}'", written.join(" ")));
    }
    type_words.pop();
    let type_name = type_words.join(" ");

    if pointer {
        return Ok(ParamKind::Pointer {
            space: space.unwrap_or(AddressSpace::Private),
            pointee: type_name,
        });
    }
    if space.is_some_and(|s| s != AddressSpace::Private) {
        return Err(format!("parameter of type '{type_name}' in a non-private address space"));
    }
    match scalar_size(&type_name) {
        Some(size) => Ok(ParamKind::Scalar { type_name, size }),
        None => Err(format!("unknown parameter type '{type_name}'")),
    }
}

/// Byte size of an OpenCL C scalar or vector type.
pub fn scalar_size(type_name: &str) -> Option<usize> {
    let base = match type_name {
        "unsigned char" => return Some(1),
        "unsigned short" => return Some(2),
        "unsigned int" | "unsigned" => return Some(4),
        "unsigned long" => return Some(8),
        other => other,
    };
    let split = base.find(|c: char| c.is_ascii_digit()).unwrap_or(base.len());
    let (scalar, lanes) = base.split_at(split);
    let elem = match scalar {
        "bool" | "char" | "uchar" => 1,
        "short" | "ushort" | "half" => 2,
        "int" | "uint" | "float" => 4,
        "long" | "ulong" | "double" | "size_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t" => 8,
        _ => return None,
    };
    let lanes = match lanes {
        "" => 1,
        "2" | "3" | "4" | "8" | "16" => lanes.parse::<usize>().ok()?,
        _ => return None,
    };
    // 3-component vectors occupy the storage of 4.
    Some(elem * if lanes == 3 { 4 } else { lanes })
}
