//! Composition, balancing, signing and submission of spore transactions.
//!
//! The entry point is [`compose::SporeComposer`], which turns one of the
//! closed [`compose::SporeOperation`] intents into a balanced
//! [`skeleton::TransactionSkeleton`]. The skeleton is then handed through one
//! or more [`signer`] passes, each filling only the witness slots owned by
//! that signer's lock, and finally submitted via [`query::send_transaction`].

pub mod compose;
pub mod error;
pub mod fee;
pub mod query;
pub mod signer;
pub mod skeleton;
pub mod type_id;

pub use compose::{ComposeResult, SporeComposer, SporeOperation};
pub use error::ComposeError;
pub use skeleton::TransactionSkeleton;
