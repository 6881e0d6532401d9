pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryFormStore;
pub use postgres::{PostgresFormStore, FORMS_CHANGED_CHANNEL};
pub use store::{ChangeFeed, FormChange, FormCounter, FormStore};
