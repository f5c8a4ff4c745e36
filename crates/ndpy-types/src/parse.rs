//! Type string parser.
//!
//! Accepts the same notation [`RuntimeType`]'s `Display` produces:
//!
//! ```text
//! 3 * var * ?int32
//! {x: float64, tags: var * string}
//! (int32, int32) -> int32        (signatures only)
//! ```

use logos::Logos;
use smol_str::SmolStr;
use std::ops::Range;

use crate::error::{NdError, NdResult};
use crate::types::{FloatWidth, IntWidth, RuntimeType, StringEncoding, TypeKind};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[regex("[0-9]+", |lex| lex.slice().parse::<usize>().ok())]
    Integer(usize),

    #[regex("[A-Za-z_][A-Za-z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),

    #[regex("'[^']*'", |lex| { let s = lex.slice(); SmolStr::new(&s[1..s.len() - 1]) })]
    Quoted(SmolStr),

    #[token("*")]
    Star,
    #[token("?")]
    Question,
    #[token("->")]
    Arrow,
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
    #[token(":")]
    Colon,
}

struct Parser<'src> {
    source: &'src str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> NdResult<Self> {
        let mut tokens = Vec::new();
        for (result, span) in Token::lexer(source).spanned() {
            match result {
                Ok(token) => tokens.push((token, span)),
                Err(_) => {
                    return Err(NdError::TypeParse {
                        offset: span.start,
                        message: format!("unexpected input {:?}", &source[span]),
                    })
                }
            }
        }
        Ok(Self { source, tokens, pos: 0 })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |(_, span)| span.start)
    }

    fn error<T>(&self, message: impl Into<String>) -> NdResult<T> {
        Err(NdError::TypeParse {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> NdResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            self.error(format!("expected {what}"))
        }
    }

    fn finish(&self) -> NdResult<()> {
        if self.pos < self.tokens.len() {
            return self.error("unexpected trailing input");
        }
        Ok(())
    }

    fn parse_type(&mut self) -> NdResult<RuntimeType> {
        match (self.peek(), self.peek_at(1)) {
            (Some(Token::Integer(n)), Some(Token::Star)) => {
                let n = *n;
                self.pos += 2;
                Ok(RuntimeType::fixed_dim(n, self.parse_type()?))
            }
            (Some(Token::Ident(name)), Some(Token::Star)) if name == "var" => {
                self.pos += 2;
                Ok(RuntimeType::var_dim(self.parse_type()?))
            }
            (Some(Token::Question), _) => {
                self.pos += 1;
                Ok(RuntimeType::option(self.parse_type()?))
            }
            (Some(Token::LParen), _) => {
                self.pos += 1;
                Ok(RuntimeType::tuple(self.parse_type_list(Token::RParen)?))
            }
            (Some(Token::LBrace), _) => {
                self.pos += 1;
                self.parse_struct()
            }
            (Some(Token::Ident(_)), _) => self.parse_named(),
            _ => self.error("expected a type"),
        }
    }

    fn parse_type_list(&mut self, close: Token) -> NdResult<Vec<RuntimeType>> {
        let mut types = Vec::new();
        if self.eat(&close) {
            return Ok(types);
        }
        loop {
            types.push(self.parse_type()?);
            if self.eat(&close) {
                return Ok(types);
            }
            self.expect(Token::Comma, "',' or a closing bracket")?;
        }
    }

    fn parse_struct(&mut self) -> NdResult<RuntimeType> {
        let mut fields: Vec<(SmolStr, RuntimeType)> = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(RuntimeType::struct_type(fields));
        }
        loop {
            let name = match self.advance() {
                Some(Token::Ident(name)) | Some(Token::Quoted(name)) => name,
                _ => return self.error("expected a field name"),
            };
            if fields.iter().any(|(n, _)| *n == name) {
                return self.error(format!("duplicate field {name}"));
            }
            self.expect(Token::Colon, "':'")?;
            fields.push((name, self.parse_type()?));
            if self.eat(&Token::RBrace) {
                return Ok(RuntimeType::struct_type(fields));
            }
            self.expect(Token::Comma, "',' or '}'")?;
        }
    }

    // `[n]`, `['enc']` or `[n, 'enc']` after a string-like name
    fn parse_string_args(&mut self) -> NdResult<(Option<usize>, StringEncoding)> {
        let mut size = None;
        let mut encoding = StringEncoding::Utf8;
        if !self.eat(&Token::LBracket) {
            return Ok((size, encoding));
        }
        loop {
            match self.advance() {
                Some(Token::Integer(n)) => size = Some(n),
                Some(Token::Quoted(enc)) => {
                    encoding = match enc.as_str() {
                        "ascii" | "A" => StringEncoding::Ascii,
                        "utf8" | "utf-8" | "U8" => StringEncoding::Utf8,
                        other => return self.error(format!("unknown encoding '{other}'")),
                    }
                }
                _ => return self.error("expected a size or an encoding"),
            }
            if self.eat(&Token::RBracket) {
                return Ok((size, encoding));
            }
            self.expect(Token::Comma, "',' or ']'")?;
        }
    }

    fn parse_named(&mut self) -> NdResult<RuntimeType> {
        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return self.error("expected a type name"),
        };
        let kind = match name.as_str() {
            "void" => TypeKind::Void,
            "bool" => TypeKind::Bool,
            "int8" => TypeKind::Int { width: IntWidth::W8, signed: true },
            "int16" => TypeKind::Int { width: IntWidth::W16, signed: true },
            "int32" => TypeKind::Int { width: IntWidth::W32, signed: true },
            "int64" | "intptr" => TypeKind::Int { width: IntWidth::W64, signed: true },
            "int128" => TypeKind::Int { width: IntWidth::W128, signed: true },
            "uint8" => TypeKind::Int { width: IntWidth::W8, signed: false },
            "uint16" => TypeKind::Int { width: IntWidth::W16, signed: false },
            "uint32" => TypeKind::Int { width: IntWidth::W32, signed: false },
            "uint64" | "uintptr" => TypeKind::Int { width: IntWidth::W64, signed: false },
            "uint128" => TypeKind::Int { width: IntWidth::W128, signed: false },
            "float16" => TypeKind::Float(FloatWidth::F16),
            "float32" => TypeKind::Float(FloatWidth::F32),
            "float64" | "real" => TypeKind::Float(FloatWidth::F64),
            "complex64" => TypeKind::Complex(FloatWidth::F32),
            "complex128" | "complex" => TypeKind::Complex(FloatWidth::F64),
            "bytes" => TypeKind::Bytes { fixed: None },
            "fixed_bytes" => {
                let (size, _) = self.parse_string_args()?;
                match size {
                    Some(n) => TypeKind::Bytes { fixed: Some(n) },
                    None => return self.error("fixed_bytes requires a size"),
                }
            }
            "string" => {
                let (size, encoding) = self.parse_string_args()?;
                TypeKind::String { encoding, fixed: size }
            }
            "fixed_string" => {
                let (size, encoding) = self.parse_string_args()?;
                match size {
                    Some(n) => TypeKind::String { encoding, fixed: Some(n) },
                    None => return self.error("fixed_string requires a size"),
                }
            }
            "date" => TypeKind::Date,
            "time" => TypeKind::Time,
            "datetime" => TypeKind::DateTime,
            "type" => TypeKind::Type,
            "Any" => TypeKind::Any,
            other => return self.error(format!("unknown type name {other:?}")),
        };
        Ok(RuntimeType::new(kind))
    }
}

/// Parse a type string such as `"3 * var * int32"`.
pub fn parse_type(source: &str) -> NdResult<RuntimeType> {
    let mut parser = Parser::new(source)?;
    let tp = parser.parse_type()?;
    parser.finish()?;
    Ok(tp)
}

/// Parse a callable signature such as `"(int32, int32) -> int32"`.
pub fn parse_signature(source: &str) -> NdResult<(Vec<RuntimeType>, RuntimeType)> {
    let mut parser = Parser::new(source)?;
    parser.expect(Token::LParen, "'('")?;
    let params = parser.parse_type_list(Token::RParen)?;
    parser.expect(Token::Arrow, "'->'")?;
    let ret = parser.parse_type()?;
    parser.finish()?;
    Ok((params, ret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_dims() {
        let tp = parse_type("3 * var * ?int32").unwrap();
        assert_eq!(
            tp,
            RuntimeType::fixed_dim(3, RuntimeType::var_dim(RuntimeType::option(RuntimeType::int32())))
        );
    }

    #[test]
    fn test_display_parses_back() {
        for text in [
            "{x: int32, y: var * string}",
            "(float64, complex64, date)",
            "fixed_string[8]",
            "string['ascii']",
            "2 * 3 * uint128",
            "?datetime",
        ] {
            let tp = parse_type(text).unwrap();
            assert_eq!(tp.to_string(), text);
        }
    }

    #[test]
    fn test_parse_signature() {
        let (params, ret) = parse_signature("(int32, int32) -> int32").unwrap();
        assert_eq!(params, vec![RuntimeType::int32(), RuntimeType::int32()]);
        assert_eq!(ret, RuntimeType::int32());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_type("3 *"), Err(NdError::TypeParse { offset: 3, .. })));
        assert!(parse_type("int33").is_err());
        assert!(parse_type("{a: int32, a: int8}").is_err());
        assert!(parse_type("int32 int32").is_err());
    }
}
