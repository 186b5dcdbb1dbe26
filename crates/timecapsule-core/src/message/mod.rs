//! Message domain: model, validation, and persistence.

mod model;
mod repository;
mod validation;

pub use model::{
    EncryptedField, ManageView, MessageDraft, MessageId, MessageRecord, MessageState,
    MutationOutcome, NewMessage, Preview, UpdatedContent,
};
pub use repository::MessageRepository;
pub use validation::{ValidationError, ensure_future_send_at, validate_draft};
