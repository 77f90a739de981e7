pub mod factory;
pub mod inference;
pub mod openai;
pub mod registry;

pub use factory::{get_client_profile, ClientProfile};
pub use inference::infer_provider;
pub use registry::{all_descriptors, get_descriptor, ProviderDescriptor, ProviderId};
