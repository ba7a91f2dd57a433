use std::borrow::Cow;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    #[default]
    ASC,
    DESC,
}

/// A sort key: an entity field and its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordered {
    pub field: Cow<'static, str>,
    pub order: Order,
}
