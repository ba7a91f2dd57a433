/// Append `values` to `out` calling `f` for each one, with `separator` between
/// entries that actually produced output.
pub fn separated_by<T, F>(
    out: &mut String,
    values: impl IntoIterator<Item = T>,
    mut f: F,
    separator: &str,
) where
    F: FnMut(&mut String, T),
{
    let mut len = out.len();
    for v in values {
        if out.len() > len {
            out.push_str(separator);
        }
        len = out.len();
        f(out, v);
    }
}

/// Fallible variant of [`separated_by`], stops at the first error.
pub fn try_separated_by<T, F>(
    out: &mut String,
    values: impl IntoIterator<Item = T>,
    mut f: F,
    separator: &str,
) -> crate::Result<()>
where
    F: FnMut(&mut String, T) -> crate::Result<()>,
{
    let mut len = out.len();
    for v in values {
        if out.len() > len {
            out.push_str(separator);
        }
        len = out.len();
        f(out, v)?;
    }
    Ok(())
}

pub fn consume_while<'s>(input: &mut &'s str, predicate: impl FnMut(&char) -> bool) -> &'s str {
    let len = input
        .chars()
        .take_while(predicate)
        .map(char::len_utf8)
        .sum::<usize>();
    if len == 0 {
        return "";
    }
    let result = &input[..len];
    *input = &input[len..];
    result
}

/// Whether the whole fragment is enclosed by one matching pair of parentheses.
pub fn is_parenthesized(fragment: &str) -> bool {
    let bytes = fragment.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'(' || bytes[bytes.len() - 1] != b')' {
        return false;
    }
    let mut depth = 0usize;
    let mut quoted = false;
    for (i, c) in bytes.iter().enumerate() {
        match c {
            b'\'' => quoted = !quoted,
            b'(' if !quoted => depth += 1,
            b')' if !quoted => {
                depth -= 1;
                if depth == 0 && i != bytes.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[macro_export]
macro_rules! possibly_parenthesized {
    ($buff:ident, $cond:expr, $v:expr) => {
        if $cond {
            $buff.push('(');
            $v;
            $buff.push(')');
        } else {
            $v;
        }
    };
}

#[macro_export]
macro_rules! truncate_long {
    ($query:expr) => {
        format_args!(
            "{}{}",
            $query
                .get(..::std::cmp::min($query.len(), 497))
                .unwrap_or(&$query[..]),
            if $query.len() > 497 { "..." } else { "" },
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parenthesized() {
        assert!(is_parenthesized("(a = b)"));
        assert!(is_parenthesized("((a) AND (b))"));
        assert!(!is_parenthesized("(a) AND (b)"));
        assert!(!is_parenthesized("a LIKE '%'+@p0"));
        assert!(is_parenthesized("(a = ')')"));
        assert!(!is_parenthesized("1=0"));
    }

    #[test]
    fn consume() {
        let mut input = "abc123 rest";
        assert_eq!(consume_while(&mut input, char::is_ascii_alphabetic), "abc");
        assert_eq!(consume_while(&mut input, char::is_ascii_digit), "123");
        assert_eq!(input, " rest");
        assert_eq!(consume_while(&mut input, char::is_ascii_digit), "");
    }
}
