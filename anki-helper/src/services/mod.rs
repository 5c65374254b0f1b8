//! Wire clients for the external services
//!
//! - [`AnkiConnectClient`]: note store (AnkiConnect add-on)
//! - [`AzureTtsClient`]: speech synthesis (Azure Cognitive Services)

pub mod anki_connect_client;
pub mod azure_tts_client;

pub use anki_connect_client::{Action, ActionRequest, AnkiConnectClient};
pub use azure_tts_client::AzureTtsClient;
