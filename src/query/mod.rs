pub mod filter;
pub mod operators;
pub mod plan;
pub mod planner;

pub use filter::{FilterOperation, FilterStage, compile_filters, split_filters};
pub use plan::{Direction, Filter, OrderBy, Paginator, Pattern, Request, Response, ResultMode, Select};
pub use planner::{ExecutionStage, SelectOutcome, execute_select, run_select};
