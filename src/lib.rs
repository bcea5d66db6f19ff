//! Engine for multi-party electronic contract signing: versioned templates,
//! per-signer evidence capture, a contract state machine with integrity
//! sealing, and adapters for external e-signature providers.

pub mod audit;
pub mod contract;
pub mod error;
pub mod evidence;
pub mod integrity;
pub mod notify;
pub mod provider;
pub mod store;
pub mod template;
pub mod template_store;
pub mod utils;
pub mod workflow;
