//! Client-side session state and its persisted fields.

mod model;
mod store;

pub use model::{
    Message, Role, RunStatus, Session, SessionField, SessionFields, TurnEnd, TurnPhase,
};
pub use store::SessionStore;
