//! LMS integration domain: models, persistence contracts, id resolution.

mod model;
mod remote_id;
mod retry;
mod traits;

pub use model::*;
pub use remote_id::*;
pub use retry::*;
pub use traits::*;
