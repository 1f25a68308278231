pub mod hosts;
pub mod ids;
pub mod query;
pub mod submit;
