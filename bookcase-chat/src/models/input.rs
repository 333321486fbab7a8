//! Request DTOs with garde validation.
//!
//! Checked before any request leaves the client.

use garde::Validate;
use serde::Serialize;

use crate::error::{ChatError, Result};

pub const MAX_MESSAGE_LENGTH: usize = 10000;

fn validate_not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("Message cannot be blank"));
    }
    Ok(())
}

/// Body of `POST /chat/enviar`.
#[derive(Debug, Clone, Serialize, Validate)]
#[garde(context(()))]
pub struct SendMessageInput {
    #[serde(rename = "remetenteId")]
    #[garde(range(min = 1))]
    pub sender_id: i64,
    #[serde(rename = "destinatarioId")]
    #[garde(range(min = 1))]
    pub recipient_id: i64,
    #[serde(rename = "conteudo")]
    #[garde(length(chars, min = 1, max = MAX_MESSAGE_LENGTH), custom(validate_not_blank))]
    pub content: String,
}

impl SendMessageInput {
    /// Builds a validated request. The text is trimmed before it is checked.
    pub fn new(sender_id: i64, recipient_id: i64, text: &str) -> Result<Self> {
        let input = Self {
            sender_id,
            recipient_id,
            content: text.trim().to_string(),
        };
        input.validate_input()?;
        if input.sender_id == input.recipient_id {
            return Err(ChatError::Validation(
                "Cannot send a message to yourself".to_string(),
            ));
        }
        Ok(input)
    }
}

/// Helper trait to convert garde validation errors into `ChatError`
pub trait ValidateExt {
    fn validate_input(&self) -> Result<()>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<()> {
        self.validate()
            .map_err(|e| ChatError::Validation(e.to_string()))
    }
}
