//! Storage layer
//!
//! - `JsonStore`: 범용 JSON 파일 저장소
//! - `JsonProjectStore` / `MemoryProjectStore`: `ProjectStore` 구현

pub mod json;
pub mod project;

pub use json::JsonStore;
pub use project::{JsonProjectStore, MemoryProjectStore};
