//! Parameter binding.
//!
//! One generic binder serves MySQL, PostgreSQL and SQLite: every `QueryParam`
//! variant maps to a Rust type all three drivers encode natively.

use crate::models::QueryParam;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

/// Arguments buffer of a database, as carried by `sqlx::query`.
pub(crate) type Arguments<'q, DB> = <DB as Database>::Arguments<'q>;

/// Bind `params` to `query` in order.
pub(crate) fn bind_all<'q, DB>(
    mut query: Query<'q, DB, Arguments<'q, DB>>,
    params: &'q [QueryParam],
) -> Query<'q, DB, Arguments<'q, DB>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            // NULL needs a concrete type; text is accepted by every backend
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
        };
    }
    query
}
