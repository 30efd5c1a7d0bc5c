pub mod registry;

pub use registry::{ProviderKind, ProviderRegistry};
