use crate::{
    AsValue, Expression, Method, Result, UsageError, Value, consume_while, error::raise,
};
use rust_decimal::Decimal;
use time::{
    Date, OffsetDateTime, PrimitiveDateTime, Time, format_description::well_known::Rfc3339,
    macros::format_description,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Literal(Value),
    Minus,
    Open,
    Close,
    Comma,
}

/// Parse an OData style filter into an [`Expression`].
///
/// Supports `eq ne gt ge lt le and or not has in`, the arithmetic operators
/// `add sub mul div mod`, unary `-`, the functions `contains`, `startswith`,
/// `endswith`, `substringof` and `concat`, and string, number, boolean, null,
/// guid, date, time, datetime and binary literals.
///
/// ```rust
/// use keel_core::{col, parse_filter};
/// let parsed = parse_filter("age ge 18 and startswith(name, 'A')").unwrap();
/// assert_eq!(parsed, col("age").ge(18).and(col("name").starts_with("A")));
/// ```
pub fn parse_filter(filter: &str) -> Result<Expression> {
    let tokens = tokenize(filter)?;
    let mut parser = Parser {
        filter,
        tokens,
        position: 0,
    };
    let expression = parser.parse_or()?;
    if parser.position < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expression)
}

fn filter_error(filter: &str, offset: usize, message: impl Into<String>) -> crate::Error {
    raise(UsageError::Filter {
        filter: filter.into(),
        offset,
        message: message.into(),
    })
}

fn tokenize(filter: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut input = filter;
    loop {
        consume_while(&mut input, |c| c.is_whitespace());
        let offset = filter.len() - input.len();
        let Some(c) = input.chars().next() else {
            break;
        };
        let token = match c {
            '(' => {
                input = &input[1..];
                Token::Open
            }
            ')' => {
                input = &input[1..];
                Token::Close
            }
            ',' => {
                input = &input[1..];
                Token::Comma
            }
            '-' => {
                input = &input[1..];
                Token::Minus
            }
            '\'' => Token::Literal(Value::Varchar(Some(
                quoted(&mut input).map_err(|m| filter_error(filter, offset, m))?,
            ))),
            _ if bare_guid(input).is_some() => {
                let (uuid, len) = bare_guid(input).unwrap_or_default();
                input = &input[len..];
                Token::Literal(Value::Uuid(Some(uuid)))
            }
            _ if c.is_ascii_digit() => {
                number(&mut input).map_err(|m| filter_error(filter, offset, m))?
            }
            _ if c.is_alphabetic() || c == '_' => {
                let identifier =
                    consume_while(&mut input, |c| c.is_alphanumeric() || matches!(c, '_' | '.'));
                if input.starts_with('\'') {
                    let text =
                        quoted(&mut input).map_err(|m| filter_error(filter, offset, m))?;
                    Token::Literal(
                        typed_literal(identifier, &text)
                            .map_err(|m| filter_error(filter, offset, m))?,
                    )
                } else {
                    Token::Identifier(identifier.into())
                }
            }
            _ => {
                return Err(filter_error(
                    filter,
                    offset,
                    format!("unexpected character `{}`", c),
                ));
            }
        };
        tokens.push((token, offset));
    }
    Ok(tokens)
}

fn quoted(input: &mut &str) -> std::result::Result<String, String> {
    let mut result = String::new();
    let mut chars = input.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                result.push('\'');
                continue;
            }
            *input = &input[i + 1..];
            return Ok(result);
        }
        result.push(c);
    }
    Err("unterminated string literal".into())
}

fn bare_guid(input: &str) -> Option<(Uuid, usize)> {
    let candidate = input.get(..36)?;
    if candidate.as_bytes()[8] != b'-' {
        return None;
    }
    if input[36..]
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        return None;
    }
    Uuid::parse_str(candidate).ok().map(|v| (v, 36))
}

fn number(input: &mut &str) -> std::result::Result<Token, String> {
    let original = *input;
    let digits = consume_while(input, char::is_ascii_digit);
    if digits.len() == 4 && input.starts_with('-') {
        *input = original;
        let text = consume_while(input, |c| {
            c.is_ascii_digit() || matches!(c, '-' | ':' | 'T' | '.' | 'Z' | '+')
        });
        return temporal(text).map(Token::Literal);
    }
    let mut float = false;
    if input.starts_with('.') && input[1..].starts_with(|c: char| c.is_ascii_digit()) {
        *input = &input[1..];
        consume_while(input, char::is_ascii_digit);
        float = true;
    }
    if input.starts_with(['e', 'E']) {
        let mut rest = &input[1..];
        if rest.starts_with(['+', '-']) {
            rest = &rest[1..];
        }
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            consume_while(&mut rest, char::is_ascii_digit);
            *input = rest;
            float = true;
        }
    }
    let text = &original[..original.len() - input.len()];
    let suffix = input.chars().next().filter(|c| c.is_ascii_alphabetic());
    if suffix.is_some() {
        *input = &input[1..];
    }
    if input.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        return Err(format!("malformed number `{}`", original));
    }
    let value = match suffix {
        Some('m' | 'M') => Value::Decimal(
            Some(text.parse::<Decimal>().map_err(|e| e.to_string())?),
            0,
            0,
        ),
        Some('d' | 'D' | 'f' | 'F') => float_value(text)?,
        Some('l' | 'L') if !float => Value::Int64(Some(
            atoi::atoi::<i64>(text.as_bytes()).ok_or("integer literal out of range")?,
        )),
        Some(s) => return Err(format!("unknown numeric suffix `{}`", s)),
        None if float => float_value(text)?,
        None => {
            let v = atoi::atoi::<i64>(text.as_bytes()).ok_or("integer literal out of range")?;
            match i32::try_from(v) {
                Ok(v) => Value::Int32(Some(v)),
                Err(..) => Value::Int64(Some(v)),
            }
        }
    };
    Ok(Token::Literal(value))
}

fn float_value(text: &str) -> std::result::Result<Value, String> {
    fast_float::parse::<f64, _>(text)
        .map(|v| Value::Float64(Some(v)))
        .map_err(|_| format!("malformed number `{}`", text))
}

fn temporal(text: &str) -> std::result::Result<Value, String> {
    let Some((_, time)) = text.split_once('T') else {
        return Date::parse(text, format_description!("[year]-[month]-[day]"))
            .map(|v| Value::Date(Some(v)))
            .map_err(|e| e.to_string());
    };
    if time.ends_with('Z') || time.contains(['+', '-']) {
        return OffsetDateTime::parse(text, &Rfc3339)
            .map(|v| Value::TimestampWithTimezone(Some(v)))
            .map_err(|e| e.to_string());
    }
    PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        )
    })
    .map(|v| Value::Timestamp(Some(v)))
    .map_err(|e| e.to_string())
}

fn typed_literal(kind: &str, text: &str) -> std::result::Result<Value, String> {
    match kind.to_ascii_lowercase().as_str() {
        "guid" => Uuid::parse_str(text)
            .map(|v| Value::Uuid(Some(v)))
            .map_err(|e| e.to_string()),
        "datetime" | "datetimeoffset" => temporal(&text.replacen(' ', "T", 1)),
        "date" => temporal(text),
        "time" => Time::try_from_value(Value::Varchar(Some(text.into())))
            .map(|v| Value::Time(Some(v)))
            .map_err(|e| e.to_string()),
        "binary" | "x" => hex::decode(text)
            .map(|v| Value::Blob(Some(v.into())))
            .map_err(|e| e.to_string()),
        _ => Err(format!("unknown literal prefix `{}`", kind)),
    }
}

struct Parser<'s> {
    filter: &'s str,
    tokens: Vec<(Token, usize)>,
    position: usize,
}

impl<'s> Parser<'s> {
    fn error(&self, message: impl Into<String>) -> crate::Error {
        let offset = self
            .tokens
            .get(self.position)
            .map(|(_, o)| *o)
            .unwrap_or(self.filter.len());
        filter_error(self.filter, offset, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(t, _)| t.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn keyword(&mut self, keywords: &[&'static str]) -> Option<&'static str> {
        let Some(Token::Identifier(identifier)) = self.peek() else {
            return None;
        };
        let found = keywords.iter().find(|k| **k == identifier.as_str()).copied();
        if found.is_some() {
            self.position += 1;
        }
        found
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.position += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut result = self.parse_and()?;
        while self.keyword(&["or"]).is_some() {
            result = result.or(self.parse_and()?);
        }
        Ok(result)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut result = self.parse_not()?;
        while self.keyword(&["and"]).is_some() {
            result = result.and(self.parse_not()?);
        }
        Ok(result)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.keyword(&["not"]).is_some() {
            return Ok(self.parse_not()?.not());
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let lhs = self.parse_additive()?;
        let Some(op) = self.keyword(&["eq", "ne", "gt", "ge", "lt", "le", "has", "in"]) else {
            return Ok(lhs);
        };
        Ok(match op {
            "in" => Expression::In(lhs.into(), self.parse_list()?),
            "has" => lhs.has_flag(self.parse_additive()?),
            _ => {
                let rhs = self.parse_additive()?;
                match op {
                    "eq" => lhs.eq(rhs),
                    "ne" => lhs.ne(rhs),
                    "gt" => lhs.gt(rhs),
                    "ge" => lhs.ge(rhs),
                    "lt" => lhs.lt(rhs),
                    _ => lhs.le(rhs),
                }
            }
        })
    }

    fn parse_list(&mut self) -> Result<Vec<Value>> {
        self.expect(Token::Open, "`(` opening the in list")?;
        let mut values = Vec::new();
        if self.peek() == Some(&Token::Close) {
            self.position += 1;
            return Ok(values);
        }
        loop {
            match self.parse_unary()? {
                Expression::Constant(v) => values.push(v),
                _ => return Err(self.error("in lists accept only literals")),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::Close) => break,
                _ => {
                    self.position = self.position.saturating_sub(1);
                    return Err(self.error("expected `,` or `)` in the in list"));
                }
            }
        }
        Ok(values)
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut result = self.parse_multiplicative()?;
        while let Some(op) = self.keyword(&["add", "sub"]) {
            let rhs = self.parse_multiplicative()?;
            result = if op == "add" {
                result.add(rhs)
            } else {
                result.sub(rhs)
            };
        }
        Ok(result)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut result = self.parse_unary()?;
        while let Some(op) = self.keyword(&["mul", "div", "mod"]) {
            let rhs = self.parse_unary()?;
            result = match op {
                "mul" => result.mul(rhs),
                "div" => result.div(rhs),
                _ => result.rem(rhs),
            };
        }
        Ok(result)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.peek() == Some(&Token::Minus) {
            self.position += 1;
            return Ok(match self.parse_unary()? {
                Expression::Constant(Value::Int32(Some(v))) => val(-v),
                Expression::Constant(Value::Int64(Some(v))) => val(-v),
                Expression::Constant(Value::Float64(Some(v))) => val(-v),
                Expression::Constant(Value::Decimal(Some(v), p, s)) => {
                    Expression::Constant(Value::Decimal(Some(-v), p, s))
                }
                other => other.neg(),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        match self.next() {
            Some(Token::Literal(v)) => Ok(Expression::Constant(v)),
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                self.expect(Token::Close, "`)`")?;
                Ok(inner)
            }
            Some(Token::Identifier(identifier)) => match identifier.as_str() {
                "true" => Ok(val(true)),
                "false" => Ok(val(false)),
                "null" => Ok(Expression::Constant(Value::Null)),
                _ if self.peek() == Some(&Token::Open) => self.parse_function(identifier),
                _ => Ok(Expression::Column(identifier.into())),
            },
            _ => {
                self.position = self.position.saturating_sub(1);
                Err(self.error("expected an operand"))
            }
        }
    }

    fn parse_function(&mut self, name: String) -> Result<Expression> {
        self.expect(Token::Open, "`(`")?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::Close) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.position += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::Close, "`)` closing the function call")?;
        let arity = |expected: usize, args: &Vec<Expression>| {
            if args.len() != expected {
                Err(self.error(format!(
                    "`{}` expects {} arguments, got {}",
                    name,
                    expected,
                    args.len()
                )))
            } else {
                Ok(())
            }
        };
        match name.to_ascii_lowercase().as_str() {
            "contains" | "startswith" | "endswith" | "concat" => {
                arity(2, &args)?;
                let mut args = args.into_iter();
                let (Some(target), Some(arg)) = (args.next(), args.next()) else {
                    return Err(self.error("missing arguments"));
                };
                Ok(match name.to_ascii_lowercase().as_str() {
                    "contains" => target.contains(arg),
                    "startswith" => target.starts_with(arg),
                    "endswith" => target.ends_with(arg),
                    _ => target.concat(arg),
                })
            }
            "substringof" => {
                arity(2, &args)?;
                let mut args = args.into_iter();
                let (Some(arg), Some(target)) = (args.next(), args.next()) else {
                    return Err(self.error("missing arguments"));
                };
                Ok(target.contains(arg))
            }
            _ => {
                let mut args = args.into_iter();
                let Some(target) = args.next() else {
                    return Err(self.error(format!("`{}` needs at least one argument", name)));
                };
                Ok(target.call(Method::Named(name.into()), args))
            }
        }
    }
}

fn val(value: impl AsValue) -> Expression {
    Expression::Constant(value.as_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{col, null};

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(
            parse_filter("Name eq 'O''Hara' or not (Age lt 30)").unwrap(),
            col("Name").eq("O'Hara").or(col("Age").lt(30).not())
        );
        assert_eq!(
            parse_filter("City ne null and Price gt -2.5").unwrap(),
            col("City").ne(null()).and(col("Price").gt(-2.5))
        );
    }

    #[test]
    fn functions_and_lists() {
        assert_eq!(
            parse_filter("contains(Name, 'ab')").unwrap(),
            col("Name").contains("ab")
        );
        assert_eq!(
            parse_filter("substringof('ab', Name)").unwrap(),
            col("Name").contains("ab")
        );
        assert_eq!(
            parse_filter("Id in (1, 2, null)").unwrap(),
            col("Id").is_in([Value::Int32(Some(1)), Value::Int32(Some(2)), Value::Null])
        );
        assert_eq!(parse_filter("Flags has 4").unwrap(), col("Flags").has_flag(4));
    }

    #[test]
    fn literals() {
        let uuid = Uuid::parse_str("0b6ae4a2-7b0c-4f55-9a55-4d6c1d0a0f11").unwrap();
        assert_eq!(
            parse_filter("Id eq 0b6ae4a2-7b0c-4f55-9a55-4d6c1d0a0f11").unwrap(),
            col("Id").eq(uuid)
        );
        assert_eq!(
            parse_filter("Id eq guid'0b6ae4a2-7b0c-4f55-9a55-4d6c1d0a0f11'").unwrap(),
            col("Id").eq(uuid)
        );
        assert_eq!(
            parse_filter("Born ge 2001-02-03").unwrap(),
            col("Born").ge(Date::from_calendar_date(2001, time::Month::February, 3).unwrap())
        );
        assert_eq!(
            parse_filter("Total eq 10.50m").unwrap(),
            col("Total").eq(Decimal::new(1050, 2))
        );
        assert_eq!(parse_filter("Big eq 5L").unwrap(), col("Big").eq(5i64));
        assert_eq!(
            parse_filter("Data eq X'0AFF'").unwrap(),
            col("Data").eq(vec![0x0Au8, 0xFF])
        );
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(
            parse_filter("Price mul 2 add 1 gt 10").unwrap(),
            col("Price").mul(2).add(1).gt(10)
        );
    }

    #[test]
    fn errors() {
        for filter in ["Name eq", "Name eq 'x", "(Age gt 1", "Age gt 1 1", "Id in 1", "#"] {
            let error = parse_filter(filter).unwrap_err();
            assert!(
                matches!(error.downcast_ref::<UsageError>(), Some(UsageError::Filter { .. })),
                "{filter}"
            );
        }
    }
}
