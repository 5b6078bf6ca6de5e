// Pipeline processing: dimension building, entity resolution and episode correlation

pub mod correlator;
pub mod dimensions;
pub mod resolver;

pub use correlator::{
    build_intake_episodes, correlate, days_between, CorrelationOutput, CorrelationStats,
};
pub use dimensions::{DimensionTable, Dimensions};
pub use resolver::{materialize_entities, resolve_entities, ResolvedEntity};
