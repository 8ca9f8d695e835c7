pub mod batch;
pub mod builder;
pub mod defaults;
pub mod reduction;
pub mod runtime;
pub mod traits;
