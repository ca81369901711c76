//! Named parameters, their bounds, priors and ties, and the free-parameter vector layout

mod parameter;
pub use parameter::{Bounds, Parameter, ParameterStatus};

mod space;
pub use space::ParameterSpace;

mod tie;
pub use tie::TieExpr;
