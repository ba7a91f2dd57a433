mod binary_op;
mod expression;
mod method;
mod odata;
mod ordered;
mod unary_op;

pub use binary_op::*;
pub use expression::*;
pub use method::*;
pub use odata::*;
pub use ordered::*;
pub use unary_op::*;
