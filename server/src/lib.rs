pub mod blend;
pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod modification;
pub mod persona;
pub mod scoring;
pub mod service;
pub mod stats;
pub mod storage;
pub mod store;
pub mod templates;
pub mod tools;

pub use error::{PersonaError, Result};
pub use persona::Persona;
pub use service::PersonaService;
