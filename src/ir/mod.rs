//! Model intermediate representation consumed by the backend: the component
//! arena as delivered by the front end, expressions, reference resolution,
//! and the error taxonomy.

pub mod ast;
pub mod error;
pub mod expr;
pub mod resolve;
