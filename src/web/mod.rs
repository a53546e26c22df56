pub mod evaluate;
pub mod keys;
pub mod reports;
pub mod responses;
pub mod router;
pub mod rubrics;
mod state;

pub use responses::{ApiMessage, json_error};
pub use state::AppState;
