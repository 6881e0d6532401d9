//! Database repositories for data access layer
//!
//! `forms` holds the forms document store: the [`FormStore`] trait and its PostgreSQL
//! and in-memory implementations. The same store owns the `user_activity` and
//! `form_analytics` side tables.

pub mod factory;
pub mod forms;

pub use factory::create_form_store;
pub use forms::{
    ChangeFeed, FormChange, FormCounter, FormStore, InMemoryFormStore, PostgresFormStore,
    FORMS_CHANGED_CHANNEL,
};
