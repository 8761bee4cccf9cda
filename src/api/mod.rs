//! 4.M — HTTP surface: a thin axum adapter over the engine. Out of scope
//! per §1 as a collaborator, but its scaffolding is ambient stack.

pub mod errors;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
