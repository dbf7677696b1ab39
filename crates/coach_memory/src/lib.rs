//! Storage and memory-tier implementations: C2 (ledger), C3 (short-term
//! buffer), C4 (long-term vector store), the user profile store, C5
//! (memory manager facade), and C12 (reminder settings). Every SQLite
//! store shares the same connect-then-migrate idiom.

pub mod embedding;
pub mod error;
pub mod ledger;
pub mod long_term;
pub mod manager;
pub mod profile;
pub mod records;
pub mod reminders;
pub mod short_term;

pub use embedding::{cosine_similarity, Embedding, EmbeddingModel};
pub use ledger::SqliteLedgerStore;
pub use long_term::SqliteLongTermStore;
pub use manager::{CoachMemoryManager, MemoryManagerConfig};
pub use profile::SqliteUserProfileStore;
pub use records::SqliteHealthRecordStore;
pub use reminders::SqliteReminderSettingsStore;
pub use short_term::InMemoryShortTermBuffer;
