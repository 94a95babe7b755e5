//! Filter, sort, projection and aggregation vocabulary shared by the
//! repository and the store drivers.

pub mod filter;
pub mod pipeline;
pub mod projection;
pub mod sort;
pub mod value;

pub use filter::{Filter, Pattern};
pub use pipeline::{Accumulator, AccumulatorOp, Expr, GroupStage, Pipeline, Stage};
pub use projection::Projection;
pub use sort::{SortDirection, SortKey, SortSpec};
pub use value::{TypeClass, compare_values, lookup};
