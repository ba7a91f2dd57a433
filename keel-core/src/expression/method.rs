use std::borrow::Cow;

/// Method calls understood by the predicate compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// `target LIKE '%' + arg + '%'`
    Contains,
    /// `target LIKE arg + '%'`
    StartsWith,
    /// `target LIKE '%' + arg`
    EndsWith,
    /// Flag test on an integer backed enum.
    HasFlag,
    /// Any other method, always rejected by the compiler.
    Named(Cow<'static, str>),
}

impl Method {
    pub fn arity(&self) -> Option<usize> {
        match self {
            Method::Contains | Method::StartsWith | Method::EndsWith | Method::HasFlag => Some(1),
            Method::Named(..) => None,
        }
    }
}
