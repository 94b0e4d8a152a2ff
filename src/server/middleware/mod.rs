pub mod correlation;

pub use correlation::{attach_correlation_id, CorrelationId};
